//! The generic protocol server, driven end to end over the in-memory
//! stack.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use keel::aio::{CommunicationStream, Controller};
use keel::net::internal::InternalNetworkStack;
use keel::net::server::{
    ProtocolHandler, ProtocolHandlerFactory, ProtocolRequest, Server, SimpleServer,
};
use keel::net::{Name, NetworkStack};
use keel::Error;

/// Echoes every message back; a message of `q` closes the connection.
struct EchoHandler {
    pending: Vec<Bytes>,
    closing: bool,
}

impl ProtocolHandler for EchoHandler {
    fn get_operation(&mut self, request: &mut ProtocolRequest) -> Result<(), Error> {
        if !self.pending.is_empty() {
            request.data_to_send = self.pending.remove(0);
        } else if self.closing {
            request.close = true;
        }
        Ok(())
    }

    fn advance_time(&mut self, _elapsed: Duration) {}

    fn handle_data(&mut self, data: Bytes) -> Result<(), Error> {
        if &data[..] == b"q" {
            self.closing = true;
        } else {
            self.pending.push(data);
        }
        Ok(())
    }

    fn handle_send_timeout(&mut self, _unsent: Bytes) {}

    fn handle_connection_close(&mut self) {}
}

struct EchoFactory {
    created: AtomicU32,
}

impl ProtocolHandlerFactory for EchoFactory {
    fn create(&self) -> Box<dyn ProtocolHandler> {
        self.created.fetch_add(1, Ordering::Relaxed);
        Box::new(EchoHandler {
            pending: Vec::new(),
            closing: false,
        })
    }
}

fn spawn_echo_server(
    stack: &Arc<InternalNetworkStack>,
    name: &Name,
) -> (Arc<Server>, Arc<EchoFactory>, std::thread::JoinHandle<()>) {
    let listener = stack.listen(name, 10).unwrap();
    let factory = Arc::new(EchoFactory {
        created: AtomicU32::new(0),
    });
    let server = Arc::new(Server::new(listener, factory.clone()));
    let runner = Arc::clone(&server);
    let handle = std::thread::spawn(move || runner.run());
    (server, factory, handle)
}

#[test]
fn echo_session_lifecycle() {
    let stack = InternalNetworkStack::create();
    let name = Name::new("echo", "1");
    let (server, _factory, handle) = spawn_echo_server(&stack, &name);

    let socket = stack.connect(&name, Some(Duration::from_secs(5))).unwrap();
    let ctl = Controller::new();
    let mut io = CommunicationStream::new(&ctl, socket);

    io.write_all(b"hi").unwrap();
    let mut buf = [0u8; 2];
    io.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hi");

    // "q" makes the handler close the connection: end of file.
    io.write_all(b"q").unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(io.read(&mut buf).unwrap(), 0);

    server.stop();
    handle.join().unwrap();
}

#[test]
fn serves_multiple_connections_in_one_thread() {
    let stack = InternalNetworkStack::create();
    let name = Name::new("echo", "2");
    let (server, factory, handle) = spawn_echo_server(&stack, &name);

    let clients: Vec<_> = (0..4u8)
        .map(|i| {
            let stack = Arc::clone(&stack);
            let name = name.clone();
            std::thread::spawn(move || {
                let socket = stack.connect(&name, Some(Duration::from_secs(5))).unwrap();
                let ctl = Controller::new();
                let mut io = CommunicationStream::new(&ctl, socket);
                for round in 0..10u8 {
                    let message = [b'0' + i, b'0' + round];
                    io.write_all(&message).unwrap();
                    let mut reply = [0u8; 2];
                    io.read_exact(&mut reply).unwrap();
                    assert_eq!(reply, message);
                }
                io.write_all(b"q").unwrap();
                let mut buf = [0u8; 1];
                assert_eq!(io.read(&mut buf).unwrap(), 0);
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }

    assert_eq!(factory.created.load(Ordering::Relaxed), 4);
    server.stop();
    handle.join().unwrap();
}

#[test]
fn simple_server_serves_connections_sequentially() {
    let stack = InternalNetworkStack::create();
    let name = Name::new("echo", "simple");
    let listener = stack.listen(&name, 10).unwrap();
    let factory = Arc::new(EchoFactory {
        created: AtomicU32::new(0),
    });
    let server = Arc::new(SimpleServer::new(listener, factory));
    let runner = Arc::clone(&server);
    let handle = std::thread::spawn(move || runner.run());

    for _ in 0..2 {
        let socket = stack.connect(&name, Some(Duration::from_secs(5))).unwrap();
        let ctl = Controller::new();
        let mut io = CommunicationStream::new(&ctl, socket);
        io.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        io.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        io.write_all(b"q").unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(io.read(&mut buf).unwrap(), 0);
    }

    // A stop is only noticed after a connection; trigger one.
    server.stop();
    drop(stack.connect(&name, Some(Duration::from_secs(5))).unwrap());
    handle.join().unwrap();
}

#[test]
fn stop_cancels_the_pending_accept() {
    let stack = InternalNetworkStack::create();
    let name = Name::new("echo", "3");
    let (server, _factory, handle) = spawn_echo_server(&stack, &name);

    std::thread::sleep(Duration::from_millis(50));
    server.stop();
    handle.join().unwrap();

    // Dropping the server releases the listener; connecting now fails.
    drop(server);
    let err = stack
        .connect(&name, Some(Duration::from_millis(100)))
        .unwrap_err();
    assert_eq!(err.kind(), keel::ErrorKind::ConnectionRefused);
}
