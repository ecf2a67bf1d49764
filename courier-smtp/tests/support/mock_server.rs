//! Scriptable SMTP server for exercising the TCP client
//!
//! Replies are scripted per protocol stage, `RCPT TO` replies can be set per
//! recipient, and everything received is recorded for assertions.
#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
    time::timeout,
};

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Content between `DATA` and the terminating dot, still dot-stuffed
    MessageContent(Vec<u8>),
    Quit,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Stage {
    Greeting,
    Ehlo,
    Helo,
    MailFrom,
    RcptTo,
    Data,
    DataEnd,
    Quit,
}

fn reply(code: u16, lines: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let separator = if index + 1 == lines.len() { b' ' } else { b'-' };
        out.extend_from_slice(code.to_string().as_bytes());
        out.push(separator);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[derive(Debug, Clone)]
struct Script {
    replies: HashMap<Stage, Vec<u8>>,
    recipients: HashMap<String, Vec<u8>>,
    greeting_delay: Option<Duration>,
    drop_after: Option<usize>,
}

impl Default for Script {
    fn default() -> Self {
        let replies = HashMap::from([
            (Stage::Greeting, reply(220, &["mx.example.com ESMTP ready"])),
            (
                Stage::Ehlo,
                reply(250, &["mx.example.com", "PIPELINING", "SIZE 10240000"]),
            ),
            (Stage::Helo, reply(250, &["mx.example.com"])),
            (Stage::MailFrom, reply(250, &["2.1.0 Sender ok"])),
            (Stage::RcptTo, reply(250, &["2.1.5 Recipient ok"])),
            (Stage::Data, reply(354, &["Go ahead"])),
            (Stage::DataEnd, reply(250, &["2.0.0 Queued"])),
            (Stage::Quit, reply(221, &["2.0.0 Closing"])),
        ]);

        Self {
            replies,
            recipients: HashMap::new(),
            greeting_delay: None,
            drop_after: None,
        }
    }
}

impl Script {
    fn reply(&self, stage: Stage) -> &[u8] {
        self.replies.get(&stage).map_or(&[], Vec::as_slice)
    }

    fn rcpt_reply(&self, recipient: &str) -> &[u8] {
        self.recipients
            .get(recipient)
            .map_or_else(|| self.reply(Stage::RcptTo), Vec::as_slice)
    }

    fn accepts_data(&self) -> bool {
        self.reply(Stage::Data).starts_with(b"354")
    }
}

type Received = Arc<Mutex<Vec<SmtpCommand>>>;

/// Accepts connections on a local port until dropped
pub struct MockSmtpServer {
    addr: SocketAddr,
    received: Received,
    acceptor: JoinHandle<()>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.received.lock().await.clone()
    }

    pub fn shutdown(&self) {
        self.acceptor.abort();
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

struct Session {
    stream: BufReader<TcpStream>,
    script: Arc<Script>,
    received: Received,
}

impl Session {
    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.get_mut().write_all(bytes).await?;
        self.stream.get_mut().flush().await
    }

    async fn record(&self, command: SmtpCommand) {
        self.received.lock().await.push(command);
    }

    async fn run(mut self) -> std::io::Result<()> {
        if let Some(delay) = self.script.greeting_delay {
            tokio::time::sleep(delay).await;
        }

        let script = Arc::clone(&self.script);
        self.send(script.reply(Stage::Greeting)).await?;

        let mut handled = 0;
        let mut line = String::new();

        while script.drop_after.is_none_or(|limit| handled < limit) {
            line.clear();
            match timeout(Duration::from_secs(10), self.stream.read_line(&mut line)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(read) => read?,
            };
            handled += 1;

            let command = line.trim_end();
            let (verb, argument) = command.split_once(' ').unwrap_or((command, ""));
            let argument = argument.to_string();

            match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    self.record(SmtpCommand::Ehlo(argument)).await;
                    self.send(script.reply(Stage::Ehlo)).await?;
                }
                "HELO" => {
                    self.record(SmtpCommand::Helo(argument)).await;
                    self.send(script.reply(Stage::Helo)).await?;
                }
                "MAIL" => {
                    self.record(SmtpCommand::MailFrom(argument)).await;
                    self.send(script.reply(Stage::MailFrom)).await?;
                }
                "RCPT" => {
                    let recipient = argument
                        .trim_start_matches("TO:")
                        .trim_matches(|c| c == '<' || c == '>')
                        .to_string();
                    let answer = script.rcpt_reply(&recipient).to_vec();
                    self.record(SmtpCommand::RcptTo(recipient)).await;
                    self.send(&answer).await?;
                }
                "DATA" => {
                    self.record(SmtpCommand::Data).await;
                    self.send(script.reply(Stage::Data)).await?;
                    if script.accepts_data() && !self.receive_content().await? {
                        return Ok(());
                    }
                }
                "QUIT" => {
                    self.record(SmtpCommand::Quit).await;
                    return self.send(script.reply(Stage::Quit)).await;
                }
                _ => {
                    self.record(SmtpCommand::Other(command.to_string())).await;
                    self.send(b"500 5.5.2 Command unrecognized\r\n").await?;
                }
            }
        }

        Ok(())
    }

    /// Reads up to the terminating dot. Returns `false` if the peer went away first.
    async fn receive_content(&mut self) -> std::io::Result<bool> {
        let mut content = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            if self.stream.read_until(b'\n', &mut line).await? == 0 {
                return Ok(false);
            }
            if line == b".\r\n" {
                break;
            }
            content.extend_from_slice(&line);
        }

        self.record(SmtpCommand::MessageContent(content)).await;
        let script = Arc::clone(&self.script);
        self.send(script.reply(Stage::DataEnd)).await?;
        Ok(true)
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    fn with_reply(mut self, stage: Stage, code: u16, message: &str) -> Self {
        self.script.replies.insert(stage, reply(code, &[message]));
        self
    }

    #[must_use]
    pub fn with_greeting(self, code: u16, message: &str) -> Self {
        self.with_reply(Stage::Greeting, code, message)
    }

    #[must_use]
    pub fn with_ehlo_response(self, code: u16, message: &str) -> Self {
        self.with_reply(Stage::Ehlo, code, message)
    }

    #[must_use]
    pub fn with_mail_from_response(self, code: u16, message: &str) -> Self {
        self.with_reply(Stage::MailFrom, code, message)
    }

    #[must_use]
    pub fn with_rcpt_to_response_for(mut self, recipient: &str, code: u16, message: &str) -> Self {
        self.script
            .recipients
            .insert(recipient.to_string(), reply(code, &[message]));
        self
    }

    #[must_use]
    pub fn with_data_end_response(self, code: u16, message: &str) -> Self {
        self.with_reply(Stage::DataEnd, code, message)
    }

    /// Holds back the greeting for `delay`
    #[must_use]
    pub const fn with_connection_delay(mut self, delay: Duration) -> Self {
        self.script.greeting_delay = Some(delay);
        self
    }

    /// Closes the connection silently once `count` commands were handled
    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.script.drop_after = Some(count);
        self
    }

    /// Binds to a free local port and starts serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener can't be bound.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let script = Arc::new(self.script);
        let received = Received::default();

        let acceptor = tokio::spawn({
            let received = Arc::clone(&received);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let session = Session {
                        stream: BufReader::new(stream),
                        script: Arc::clone(&script),
                        received: Arc::clone(&received),
                    };
                    tokio::spawn(session.run());
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            received,
            acceptor,
        })
    }
}
