//! End-to-end tests against a loopback UDP CoAP server.

use std::time::Duration;

use tokio::net::UdpSocket;

use coap_udp::{
    Client, Error, Message, MessageClass, MessageType, ResponseType,
};

async fn bind_server() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

fn response(
    request: &Message,
    status: ResponseType,
    payload: &[u8],
) -> Message {
    let mut response = Message::new();
    response.message_type = MessageType::Acknowledgement;
    response.code = MessageClass::Response(status);
    response.message_id = request.message_id;
    response.set_token(request.token().to_vec()).unwrap();
    response.payload = payload.to_vec();
    response
}

#[tokio::test]
async fn get_returns_piggy_backed_response() {
    let (socket, port) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
        let request = Message::from_bytes(&buf[..len]).unwrap();
        assert_eq!(request.message_type, MessageType::Confirmable);
        assert_eq!(request.options.uri_path, vec!["test"]);

        let reply = response(&request, ResponseType::Content, b"hello");
        socket
            .send_to(&reply.to_bytes().unwrap(), peer)
            .await
            .unwrap();
    });

    let client = Client::new("127.0.0.1", port).await.unwrap();
    let received = client
        .get(&format!("coap://127.0.0.1:{port}/test"))
        .await
        .unwrap();
    assert_eq!(
        received.code,
        MessageClass::Response(ResponseType::Content)
    );
    assert_eq!(received.payload, b"hello");

    server.await.unwrap();
    client.close();
}

#[tokio::test]
async fn get_waits_for_separate_response() {
    let (socket, port) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
        let request = Message::from_bytes(&buf[..len]).unwrap();

        // Acknowledge now, answer later from a fresh Confirmable.
        let mut bare_ack = Message::new();
        bare_ack.message_type = MessageType::Acknowledgement;
        bare_ack.code = MessageClass::Empty;
        bare_ack.message_id = request.message_id;
        socket
            .send_to(&bare_ack.to_bytes().unwrap(), peer)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut reply = response(&request, ResponseType::Content, b"ok");
        reply.message_type = MessageType::Confirmable;
        reply.message_id = 0x4242;
        socket
            .send_to(&reply.to_bytes().unwrap(), peer)
            .await
            .unwrap();

        // The client acknowledges the separate response.
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        let ack = Message::from_bytes(&buf[..len]).unwrap();
        assert_eq!(ack.message_type, MessageType::Acknowledgement);
        assert_eq!(ack.code, MessageClass::Empty);
        assert_eq!(ack.message_id, 0x4242);
    });

    let client = Client::new("127.0.0.1", port).await.unwrap();
    let received = client
        .get(&format!("coap://127.0.0.1:{port}/slow"))
        .await
        .unwrap();
    assert_eq!(received.payload, b"ok");

    server.await.unwrap();
    client.close();
}

#[tokio::test]
async fn post_carries_payload() {
    let (socket, port) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
        let request = Message::from_bytes(&buf[..len]).unwrap();
        assert_eq!(request.options.uri_path, vec!["echo"]);
        assert_eq!(request.payload, b"ping");

        let reply =
            response(&request, ResponseType::Changed, &request.payload);
        socket
            .send_to(&reply.to_bytes().unwrap(), peer)
            .await
            .unwrap();
    });

    let client = Client::new("127.0.0.1", port).await.unwrap();
    let received = client
        .post(
            &format!("coap://127.0.0.1:{port}/echo"),
            b"ping".to_vec(),
        )
        .await
        .unwrap();
    assert_eq!(
        received.code,
        MessageClass::Response(ResponseType::Changed)
    );
    assert_eq!(received.payload, b"ping");

    server.await.unwrap();
    client.close();
}

#[tokio::test]
async fn ping_measures_liveness() {
    let (socket, port) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
        let request = Message::from_bytes(&buf[..len]).unwrap();
        assert_eq!(request.code, MessageClass::Empty);

        let mut reset = Message::new();
        reset.message_type = MessageType::Reset;
        reset.code = MessageClass::Empty;
        reset.message_id = request.message_id;
        socket
            .send_to(&reset.to_bytes().unwrap(), peer)
            .await
            .unwrap();
    });

    let client = Client::new("127.0.0.1", port).await.unwrap();
    assert!(client.ping().await.is_ok());

    server.await.unwrap();
    client.close();
}

#[tokio::test]
async fn closed_client_refuses_requests() {
    let (_socket, port) = bind_server().await;

    let client = Client::new("127.0.0.1", port).await.unwrap();
    client.close();
    client.close();

    let result = client
        .get(&format!("coap://127.0.0.1:{port}/test"))
        .await;
    assert!(matches!(result, Err(Error::Closed)));
}
