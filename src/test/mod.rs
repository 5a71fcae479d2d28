// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright © 2024 RemasteredArch
//
// This file is part of smtp_intake.
//
// smtp_intake is free software: you can redistribute it and/or modify it under the terms of the
// GNU Affero General Public License as published by the Free Software Foundation, either version
// 3 of the License, or (at your option) any later version.
//
// smtp_intake is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License along with
// smtp_intake. If not, see <https://www.gnu.org/licenses/>.

use std::{
    error::Error,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};
use tokio_test::assert_err;

use crate::{
    message::{Handler, Message},
    proxy, read_line, write_fmt_line, write_line, MessageInspector, ProxyHandler, Server,
};


type Result = std::result::Result<(), Box<dyn Error>>;

type Messages = Arc<Mutex<Vec<Message>>>;

const PROXY_LINE: &str = "PROXY TCP4 209.85.214.42 45.76.28.175 33372 25";

const PHOTO: &str = "Subject: Snow day\r
MIME-Version: 1.0\r
Content-Type: multipart/mixed; boundary=\"b\"\r
\r
--b\r
Content-Type: text/plain\r
\r
A dog in the snow\r
--b\r
Content-Type: image/png\r
Content-Transfer-Encoding: base64\r
\r
iVBORw0KGgo=\r
--b--\r
";

/// Serve `server` on an ephemeral local port.
async fn start(server: Server) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    // Can be bound to a variable which exposes `.abort()`
    tokio::spawn(Arc::new(server).serve(listener));

    Ok(addr)
}

/// A handler that keeps every message it is given.
fn capture() -> (Messages, impl Handler) {
    let messages = Messages::default();
    let sink = Arc::clone(&messages);

    let handler = move |message: &Message| -> crate::Result<()> {
        sink.lock().unwrap().push(message.clone());
        Ok(())
    };

    (messages, handler)
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    write_stream: OwnedWriteHalf,
}

impl Client {
    /// Connect and consume the greeting.
    async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let (read_stream, write_stream) = TcpStream::connect(addr).await?.into_split();
        let mut client = Self {
            reader: BufReader::new(read_stream),
            write_stream,
        };

        assert!(is_valid_response::server_greeting(
            &read_line!(client.reader).await?
        ));

        Ok(client)
    }

    async fn send(&mut self, line: &str) -> io::Result<()> {
        write_fmt_line!(self.write_stream, "{line}")
    }

    /// Read every line of the next reply.
    async fn reply(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();

        loop {
            let line = read_line!(self.reader).await?;
            assert!(is_valid_response::smtp_line(&line), "{line:?}");

            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);

            if last {
                return Ok(lines);
            }
        }
    }

    /// Send `line` and read the single line reply to it.
    async fn command(&mut self, line: &str) -> io::Result<String> {
        self.send(line).await?;
        let mut reply = self.reply().await?;
        assert_eq!(reply.len(), 1, "{reply:?}");

        Ok(reply.remove(0))
    }

    /// Run `MAIL`, `RCPT`, and `DATA`, returning the reply to the message.
    async fn transaction(&mut self, message: &str) -> io::Result<String> {
        assert!(is_valid_response::code(
            &self.command("MAIL FROM:<sender@example.com>").await?,
            250
        ));
        assert!(is_valid_response::code(
            &self.command("RCPT TO:<inbox@example.com>").await?,
            250
        ));
        assert!(is_valid_response::start_mail_input(
            &self.command("DATA").await?
        ));

        self.write_stream.write_all(message.as_bytes()).await?;
        self.command(".").await
    }

    /// Assert that the server has closed the connection.
    async fn assert_closed(&mut self) {
        let err = assert_err!(read_line!(self.reader).await);
        assert!(matches!(
            err.kind(),
            io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
        ));
    }
}

// 4.5.1 Minimum Implementation:
//
// - [x] `EHLO`
// - [x] `HELO`
// - [x] `MAIL`
// - [x] `RCPT`
// - [x] `DATA`
// - [x] `RSET`
// - [x] `NOOP`
// - [x] `VRFY`
// - [x] `QUIT`
//
// <https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.1>
#[tokio::test]
async fn test_listen() -> Result {
    let (_, handler) = capture();
    let mut client = Client::connect(start(Server::new(handler)).await?).await?;

    write_line!(client.write_stream, "HELO client.example")?;
    assert!(is_valid_response::helo(&read_line!(client.reader).await?));

    assert!(is_valid_response::code(&client.command("NOOP").await?, 250));
    assert!(is_valid_response::code(
        &client.command("VRFY inbox").await?,
        252
    ));
    assert!(is_valid_response::code(&client.command("RSET").await?, 250));

    write_line!(client.write_stream, "QUIT")?;
    assert!(is_valid_response::quit(&read_line!(client.reader).await?));
    client.assert_closed().await;

    Ok(())
}

#[tokio::test]
async fn test_proxy_then_transaction() -> Result {
    let (messages, handler) = capture();
    let mut server = Server::new(handler).with_hostname("mx.example.com");
    server.extend(proxy::KEYWORD, ProxyHandler::new());
    let mut client = Client::connect(start(server).await?).await?;

    // No reply to the preamble, the next line answers `EHLO`.
    client.send(PROXY_LINE).await?;
    client.send("EHLO client.example").await?;
    let ehlo = client.reply().await?;
    assert_eq!(ehlo[0], "250-mx.example.com greets client.example\r\n");

    let reply = client
        .transaction("Subject: Hello\r\n\r\nHi there\r\n..dotted\r\n")
        .await?;
    assert!(is_valid_response::code(&reply, 250), "{reply:?}");

    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 1);

    let message = &messages[0];
    assert_eq!(message.from(), "sender@example.com");
    assert_eq!(message.to(), ["inbox@example.com"]);
    assert_eq!(message.subject(), "Hello");
    assert_eq!(message.forwarded_for_ip(), Some("209.85.214.42"));
    assert_eq!(
        message.remote_addr().ip(),
        "127.0.0.1".parse::<std::net::IpAddr>()?
    );

    let body = String::from_utf8_lossy(message.raw_body());
    assert!(
        body.starts_with("Received: from client.example (209.85.214.42)\r\n\tby mx.example.com with ESMTP\r\n"),
        "{body}"
    );
    assert!(body.ends_with("Hi there\r\n.dotted\r\n"), "{body}");

    Ok(())
}

#[tokio::test]
async fn test_received_without_proxy() -> Result {
    let (messages, handler) = capture();
    let mut client = Client::connect(start(Server::new(handler)).await?).await?;

    client.command("HELO client.example").await?;
    client.transaction("Subject: Hello\r\n\r\nHi\r\n").await?;

    let messages = messages.lock().unwrap();
    assert_eq!(messages[0].forwarded_for_ip(), None);
    assert!(messages[0]
        .raw_body()
        .starts_with(b"Received: from client.example (127.0.0.1)\r\n\tby localhost with SMTP\r\n"));

    Ok(())
}

#[tokio::test]
async fn test_malformed_proxy_closes() -> Result {
    let (_, handler) = capture();
    let mut server = Server::new(handler);
    server.extend(proxy::KEYWORD, ProxyHandler::new());
    let mut client = Client::connect(start(server).await?).await?;

    assert_eq!(
        client.command("PROXY TCP4 1.2.3.4").await?,
        "554 PROXY v1 format is invalid, TCP4 1.2.3.4\r\n"
    );
    client.assert_closed().await;

    Ok(())
}

#[tokio::test]
async fn test_untrusted_proxy_closes() -> Result {
    let (_, handler) = capture();
    let mut server = Server::new(handler);
    server.extend(
        proxy::KEYWORD,
        ProxyHandler::with_trusted(["10.0.0.1".parse::<std::net::IpAddr>()?]),
    );
    let mut client = Client::connect(start(server).await?).await?;

    assert_eq!(
        client.command(PROXY_LINE).await?,
        "554 PROXY not allowed from '127.0.0.1'\r\n"
    );
    client.assert_closed().await;

    Ok(())
}

#[tokio::test]
async fn test_proxy_during_transaction() -> Result {
    let (_, handler) = capture();
    let mut server = Server::new(handler);
    server.extend(proxy::KEYWORD, ProxyHandler::new());
    let mut client = Client::connect(start(server).await?).await?;

    client.command("HELO client.example").await?;
    client.command("MAIL FROM:<sender@example.com>").await?;
    assert!(is_valid_response::code(
        &client.command(PROXY_LINE).await?,
        503
    ));

    // The session survives.
    assert!(is_valid_response::code(&client.command("RSET").await?, 250));
    assert!(is_valid_response::code(&client.command("NOOP").await?, 250));

    Ok(())
}

#[tokio::test]
async fn test_proxy_after_hello_refused() -> Result {
    let (messages, handler) = capture();
    let mut server = Server::new(handler);
    server.extend(proxy::KEYWORD, ProxyHandler::new());
    let mut client = Client::connect(start(server).await?).await?;

    client.send(PROXY_LINE).await?;
    client.command("HELO client.example").await?;
    client.transaction("Subject: First\r\n\r\nOne\r\n").await?;

    // Neither after a finished transaction nor later may the address change.
    assert!(is_valid_response::code(
        &client
            .command("PROXY TCP4 6.6.6.6 45.76.28.175 33372 25")
            .await?,
        503
    ));
    assert!(is_valid_response::code(&client.command("NOOP").await?, 250));
    client.transaction("Subject: Second\r\n\r\nTwo\r\n").await?;

    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 2);
    for message in messages.iter() {
        assert_eq!(message.forwarded_for_ip(), Some("209.85.214.42"));
        assert!(message
            .raw_body()
            .starts_with(b"Received: from client.example (209.85.214.42)\r\n"));
    }

    Ok(())
}

#[tokio::test]
async fn test_repeated_proxy_closes() -> Result {
    let (_, handler) = capture();
    let mut server = Server::new(handler);
    server.extend(proxy::KEYWORD, ProxyHandler::new());
    let mut client = Client::connect(start(server).await?).await?;

    client.send(PROXY_LINE).await?;
    assert_eq!(
        client
            .command("PROXY TCP4 6.6.6.6 45.76.28.175 33372 25")
            .await?,
        "554 PROXY already received on this connection\r\n"
    );
    client.assert_closed().await;

    Ok(())
}

#[tokio::test]
async fn test_ehlo_lists_extensions() -> Result {
    let (_, handler) = capture();
    let mut server = Server::new(handler).with_max_size(Some(1024));
    server.extend("proxy", ProxyHandler::new());
    let mut client = Client::connect(start(server).await?).await?;

    client.send("EHLO client.example").await?;
    assert_eq!(
        client.reply().await?,
        [
            "250-localhost greets client.example\r\n",
            "250-SIZE 1024\r\n",
            "250 PROXY\r\n",
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_oversized_message() -> Result {
    let (messages, handler) = capture();
    let server = Server::new(handler).with_max_size(Some(64));
    let mut client = Client::connect(start(server).await?).await?;

    client.command("HELO client.example").await?;

    assert!(is_valid_response::code(
        &client
            .command("MAIL FROM:<sender@example.com> SIZE=100000")
            .await?,
        552
    ));

    let reply = client
        .transaction(&format!("Subject: Big\r\n\r\n{}\r\n", "x".repeat(128)))
        .await?;
    assert!(is_valid_response::code(&reply, 552), "{reply:?}");
    assert!(messages.lock().unwrap().is_empty());

    // The session survives.
    assert!(is_valid_response::code(&client.command("NOOP").await?, 250));

    Ok(())
}

#[tokio::test]
async fn test_inspector() -> Result {
    let mut client = Client::connect(start(Server::new(MessageInspector)).await?).await?;

    client.command("HELO client.example").await?;

    assert_eq!(
        client.transaction("Subject: Words\r\n\r\nJust words\r\n").await?,
        "554 Transaction failed - missing description or image\r\n"
    );
    assert!(is_valid_response::code(
        &client.transaction(PHOTO).await?,
        250
    ));

    Ok(())
}

#[tokio::test]
async fn test_out_of_order_commands() -> Result {
    let (_, handler) = capture();
    let mut client = Client::connect(start(Server::new(handler)).await?).await?;

    assert!(is_valid_response::code(
        &client.command("MAIL FROM:<sender@example.com>").await?,
        503
    ));
    client.command("HELO client.example").await?;
    assert!(is_valid_response::code(
        &client.command("RCPT TO:<inbox@example.com>").await?,
        503
    ));
    client.command("MAIL FROM:<sender@example.com>").await?;
    assert!(is_valid_response::code(&client.command("DATA").await?, 503));
    assert!(is_valid_response::code(
        &client.command("FROBNICATE").await?,
        500
    ));
    assert!(is_valid_response::code(&client.command("HELP").await?, 502));

    Ok(())
}
