//! Plain TCP SMTP client.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_common::{RemoteMta, outgoing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use super::{
    ClientFactory, SmtpClient,
    error::{ClientError, Result},
    response::Response,
    timeouts::SmtpTimeouts,
};

/// Initial size of the read buffer for SMTP replies.
const BUFFER_SIZE: usize = 4096;

/// Replies larger than this are treated as a protocol violation.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// An [`SmtpClient`] speaking plain SMTP over TCP.
#[derive(Debug)]
pub struct TcpSmtpClient {
    remote: RemoteMta,
    port: u16,
    helo_name: Arc<str>,
    timeouts: SmtpTimeouts,
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    /// Whether the last content byte written ended a line
    at_line_start: bool,
}

impl TcpSmtpClient {
    #[must_use]
    pub fn new(
        remote: RemoteMta,
        port: u16,
        helo_name: impl Into<Arc<str>>,
        timeouts: SmtpTimeouts,
    ) -> Self {
        Self {
            remote,
            port,
            helo_name: helo_name.into(),
            timeouts,
            stream: None,
            buffer: vec![0; BUFFER_SIZE],
            buffer_pos: 0,
            at_line_start: true,
        }
    }

    async fn send(&mut self, data: &[u8], stage: &'static str) -> Result<()> {
        let limit = self.timeouts.command();
        let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;

        timeout(limit, stream.write_all(data))
            .await
            .map_err(|_| ClientError::Timeout(stage))??;

        Ok(())
    }

    async fn command(
        &mut self,
        command: &str,
        limit: Duration,
        stage: &'static str,
    ) -> Result<Response> {
        outgoing!(level = TRACE, host = %self.remote, "-> {command}");

        self.send(format!("{command}\r\n").as_bytes(), stage).await?;
        self.read_response(limit, stage).await
    }

    async fn read_response(&mut self, limit: Duration, stage: &'static str) -> Result<Response> {
        let response = timeout(limit, self.fill_until_response())
            .await
            .map_err(|_| ClientError::Timeout(stage))??;

        outgoing!(level = TRACE, host = %self.remote, "<- {response}");

        Ok(response)
    }

    async fn fill_until_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::Parse(format!(
                        "Reply too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;
            let n = stream.read(&mut self.buffer[self.buffer_pos..]).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.buffer_pos += n;
        }
    }

    async fn greet(&mut self) -> Result<()> {
        self.read_response(self.timeouts.greeting(), "greeting")
            .await?
            .expect(2)?;

        let ehlo = format!("EHLO {}", self.helo_name);
        let response = self
            .command(&ehlo, self.timeouts.command(), "EHLO")
            .await?;

        // Servers predating ESMTP answer EHLO with a 5xx and expect HELO.
        if response.code / 100 == 5 {
            let helo = format!("HELO {}", self.helo_name);
            self.command(&helo, self.timeouts.command(), "HELO")
                .await?
                .expect(2)?;
        } else {
            response.expect(2)?;
        }

        Ok(())
    }
}

/// Escapes lines starting with a dot, as required by RFC 5321 section 4.5.2.
fn dot_stuff(data: &[u8], at_line_start: &mut bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64);

    for &byte in data {
        if *at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        *at_line_start = byte == b'\n';
    }

    out
}

#[async_trait]
impl SmtpClient for TcpSmtpClient {
    fn remote_mta(&self) -> &RemoteMta {
        &self.remote
    }

    async fn connect(&mut self) -> Result<()> {
        let port = self.port;
        let stream = match self.remote.address() {
            Some(address) => {
                timeout(
                    self.timeouts.connect(),
                    TcpStream::connect(SocketAddr::new(address, port)),
                )
                .await
            }
            None => {
                timeout(
                    self.timeouts.connect(),
                    TcpStream::connect((self.remote.host(), port)),
                )
                .await
            }
        }
        .map_err(|_| ClientError::Timeout("connect"))??;

        outgoing!(level = DEBUG, host = %self.remote, port, "Connected");

        self.stream = Some(stream);
        self.buffer_pos = 0;

        self.greet().await
    }

    async fn mail_from(&mut self, reverse_path: &str) -> Result<()> {
        self.command(
            &format!("MAIL FROM:<{reverse_path}>"),
            self.timeouts.command(),
            "MAIL FROM",
        )
        .await?
        .expect(2)
        .map(|_| ())
    }

    async fn rcpt_to(&mut self, recipient: &str) -> Result<()> {
        self.command(
            &format!("RCPT TO:<{recipient}>"),
            self.timeouts.command(),
            "RCPT TO",
        )
        .await?
        .expect(2)
        .map(|_| ())
    }

    async fn data_start(&mut self) -> Result<()> {
        self.command("DATA", self.timeouts.command(), "DATA")
            .await?
            .expect(3)?;
        self.at_line_start = true;

        Ok(())
    }

    async fn data_write(&mut self, data: &[u8]) -> Result<()> {
        let stuffed = dot_stuff(data, &mut self.at_line_start);
        self.send(&stuffed, "message content").await
    }

    async fn data_end(&mut self) -> Result<()> {
        let terminator: &[u8] = if self.at_line_start {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        };
        self.send(terminator, "end of data").await?;
        self.at_line_start = true;

        self.read_response(self.timeouts.data_end(), "end of data")
            .await?
            .expect(2)
            .map(|_| ())
    }

    async fn quit(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }

        let result = self
            .command("QUIT", self.timeouts.quit(), "QUIT")
            .await
            .and_then(|response| response.expect(2));

        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }

        result.map(|_| ())
    }
}

/// Creates [`TcpSmtpClient`]s announcing themselves as `helo_name`.
#[derive(Debug, Clone)]
pub struct TcpClientFactory {
    helo_name: Arc<str>,
    timeouts: SmtpTimeouts,
}

impl TcpClientFactory {
    #[must_use]
    pub fn new(helo_name: impl Into<Arc<str>>, timeouts: SmtpTimeouts) -> Self {
        Self {
            helo_name: helo_name.into(),
            timeouts,
        }
    }
}

impl ClientFactory for TcpClientFactory {
    fn create(&self, remote: RemoteMta, port: u16) -> Box<dyn SmtpClient> {
        Box::new(TcpSmtpClient::new(
            remote,
            port,
            Arc::clone(&self.helo_name),
            self.timeouts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_stuffing() {
        let mut at_line_start = true;
        let out = dot_stuff(b".hidden\r\nvisible\r\n..two\r\n", &mut at_line_start);
        assert_eq!(out, b"..hidden\r\nvisible\r\n...two\r\n");
        assert!(at_line_start);
    }

    #[test]
    fn test_dot_stuffing_across_writes() {
        let mut at_line_start = true;
        let first = dot_stuff(b"line one\r\n", &mut at_line_start);
        let second = dot_stuff(b".line two", &mut at_line_start);

        assert_eq!(first, b"line one\r\n");
        assert_eq!(second, b"..line two");
        assert!(!at_line_start);
    }

    #[test]
    fn test_dot_inside_line_is_untouched() {
        let mut at_line_start = false;
        assert_eq!(dot_stuff(b"a.b\r\n", &mut at_line_start), b"a.b\r\n");
    }
}
