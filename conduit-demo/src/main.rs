mod dispatch;
mod mio_transport;

use clap::{App, Arg};
use conduit::{ConnectionHandler, Manager, SweepScheduler};
use dispatch::Dispatch;
use hashbrown::HashMap;
use mio::net::TcpListener;
use mio::{Events, Poll, PollOpt, Ready, Token};
use mio_transport::TcpConn;
use slog::{info, o, warn, Logger};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(0);

fn build_logger() -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .unwrap();

    config.build_logger().unwrap()
}

fn main() {
    let matches = App::new("conduit-demo")
        .version("0.1")
        .author("SleepingPills")
        .about("Minimal echo server exercising the conduit reliability layer over mio.")
        .arg(
            Arg::with_name("LISTEN")
                .help("Address to listen on")
                .default_value("127.0.0.1:28008"),
        )
        .arg(
            Arg::with_name("SWEEP_MS")
                .long("sweep-ms")
                .help("Cadence, in milliseconds, at which pending sends are swept for retransmission")
                .default_value("500"),
        )
        .get_matches();

    let listen_addr: SocketAddr = matches.value_of("LISTEN").unwrap().parse().expect("Invalid listen address");
    let sweep_ms: u64 = matches.value_of("SWEEP_MS").unwrap().parse().expect("Invalid sweep cadence");

    let log = build_logger();

    let manager = Arc::new(
        Manager::new(log.new(o!("component" => "manager"))).with_send_failed_callback({
            let log = log.new(o!("component" => "manager"));
            move |conn_id, sequence, reason| {
                warn!(log, "giving up on pending send";
                    "connection_id" => conn_id, "sequence" => sequence, "reason" => ?reason);
            }
        }),
    );

    let mut dispatch = Dispatch::new();
    dispatch.register(dispatch::ECHO_SERVER, dispatch::echo_handler);
    let dispatch = Arc::new(dispatch);

    let handler = Arc::new({
        let manager = manager.clone();
        let dispatch = dispatch.clone();
        ConnectionHandler::new(manager.clone(), log.new(o!("component" => "handler"))).with_message_callback(
            move |conn, msg| dispatch.dispatch(&manager, conn, msg),
        )
    });

    let poll = Poll::new().expect("mio poll creation failed");
    let listener = TcpListener::bind(&listen_addr).expect("bind failed");
    poll.register(&listener, LISTENER_TOKEN, Ready::readable(), PollOpt::edge())
        .expect("listener registration failed");

    let mut next_token = 1usize;
    let mut connections: HashMap<Token, (Arc<TcpConn>, Arc<dyn conduit::ConnectionHandle>)> = HashMap::new();

    let mut events = Events::with_capacity(1024);
    let mut sweep = SweepScheduler::new(Duration::from_millis(sweep_ms));

    info!(log, "listening"; "address" => %listen_addr);

    loop {
        poll.poll(&mut events, Some(sweep.poll_timeout())).expect("poll failed");

        for event in &events {
            if event.token() == LISTENER_TOKEN {
                while let Ok((stream, peer)) = listener.accept() {
                    let token = Token(next_token);
                    next_token += 1;

                    let conn_id = peer.to_string();
                    let concrete = Arc::new(TcpConn::new(conn_id.clone(), stream, log.new(o!("connection_id" => conn_id.clone()))));
                    let handle: Arc<dyn conduit::ConnectionHandle> = concrete.clone();

                    concrete
                        .register_with(&poll, token, Ready::readable() | Ready::writable(), PollOpt::edge())
                        .expect("connection registration failed");

                    info!(log, "accepted connection"; "connection_id" => &conn_id, "token" => token.0);
                    connections.insert(token, (concrete, handle));
                }
            } else if let Some((conn, handle)) = connections.get(&event.token()) {
                if event.readiness().is_readable() {
                    match conn.read_available() {
                        Ok(bytes) if !bytes.is_empty() => {
                            if handler.bytes_received(handle, &bytes).is_err() {
                                conn.mark_disconnected();
                            }
                        }
                        Ok(_) => {}
                        Err(_) => conn.mark_disconnected(),
                    }
                }

                if event.readiness().is_writable() && conn.flush().is_err() {
                    conn.mark_disconnected();
                }

                if !conn.is_connected() {
                    handler.connection_closed(conn.id());
                    connections.remove(&event.token());
                }
            }
        }

        if sweep.due() {
            manager.sweep_timeouts();
            sweep.mark_swept();
        }
    }
}
