//! In-memory stand-ins for DNS, remote SMTP servers, and the queue
#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use courier_common::{Mail, Recipient, RemoteMta};
use courier_delivery::{
    DnsLookup, LookupFailure, MailQueue, MxRecord, QueueError, TransmitError, Transmitter,
};
use courier_smtp::{ClientError, ClientFactory, SmtpClient};
use parking_lot::Mutex;

pub fn mail(from: &str, recipients: &[&str]) -> Mail {
    let from = if from.is_empty() {
        courier_common::ReversePath::Null
    } else {
        from.parse().unwrap()
    };

    Mail::new(
        from,
        recipients.iter().map(|r| r.parse::<Recipient>().unwrap()),
        "Subject: Lunch\r\nFrom: john@example.com\r\n\r\nSee you at noon.\r\n",
    )
    .unwrap()
}

pub fn recipients(addresses: &[&str]) -> Vec<Recipient> {
    addresses.iter().map(|a| a.parse().unwrap()).collect()
}

pub fn ip(address: &str) -> IpAddr {
    address.parse().unwrap()
}

/// DNS answers keyed by name. A domain without MX entries has no MX records,
/// a host without address entries does not exist.
#[derive(Debug, Default)]
pub struct FakeDns {
    mx: HashMap<String, Result<Vec<MxRecord>, LookupFailure>>,
    ips: HashMap<String, Result<Vec<IpAddr>, LookupFailure>>,
    queries: AtomicUsize,
}

impl FakeDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mx(mut self, domain: &str, records: &[(u16, &str)]) -> Self {
        self.mx.insert(
            domain.to_string(),
            Ok(records
                .iter()
                .map(|(preference, exchange)| MxRecord::new(*preference, *exchange))
                .collect()),
        );
        self
    }

    pub fn with_mx_failure(mut self, domain: &str, failure: LookupFailure) -> Self {
        self.mx.insert(domain.to_string(), Err(failure));
        self
    }

    pub fn with_host(mut self, host: &str, address: &str) -> Self {
        self.ips.insert(host.to_string(), Ok(vec![ip(address)]));
        self
    }

    pub fn with_host_failure(mut self, host: &str, failure: LookupFailure) -> Self {
        self.ips.insert(host.to_string(), Err(failure));
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DnsLookup for FakeDns {
    async fn mx(&self, domain: &str) -> Result<Vec<MxRecord>, LookupFailure> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.mx
            .get(domain)
            .cloned()
            .unwrap_or(Err(LookupFailure::TypeNotFound))
    }

    async fn ip(&self, host: &str) -> Result<Vec<IpAddr>, LookupFailure> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.ips
            .get(host)
            .cloned()
            .unwrap_or(Err(LookupFailure::NotFound))
    }
}

/// What a scripted server does at each stage. Anything not scripted is
/// accepted.
#[derive(Debug, Clone, Default)]
pub struct HostScript {
    drop_connection: bool,
    connect_reply: Option<(u16, String)>,
    sender_reply: Option<(u16, String)>,
    drop_after_recipients: Option<usize>,
    rcpt_replies: HashMap<String, (u16, String)>,
    data_end_reply: Option<(u16, String)>,
}

impl HostScript {
    pub fn accepting() -> Self {
        Self::default()
    }

    /// The connection breaks before the greeting
    pub fn unreachable() -> Self {
        Self {
            drop_connection: true,
            ..Self::default()
        }
    }

    pub fn rejecting_connection(code: u16, text: &str) -> Self {
        Self {
            connect_reply: Some((code, text.to_string())),
            ..Self::default()
        }
    }

    pub fn rejecting_sender(mut self, code: u16, text: &str) -> Self {
        self.sender_reply = Some((code, text.to_string()));
        self
    }

    /// The connection breaks on the `RCPT TO` following the first `count`
    pub fn dropping_after_recipients(mut self, count: usize) -> Self {
        self.drop_after_recipients = Some(count);
        self
    }

    pub fn rejecting_recipient(mut self, recipient: &str, code: u16, text: &str) -> Self {
        self.rcpt_replies
            .insert(recipient.to_string(), (code, text.to_string()));
        self
    }

    pub fn rejecting_data(mut self, code: u16, text: &str) -> Self {
        self.data_end_reply = Some((code, text.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect,
    MailFrom(String),
    RcptTo(String),
    DataStart,
    Data(Vec<u8>),
    DataEnd,
    Quit,
}

type EventLog = Arc<Mutex<Vec<(String, Event)>>>;

/// Hands out clients that follow the script of the host they are bound to
/// and log every call.
#[derive(Debug, Default)]
pub struct ScriptedClients {
    scripts: HashMap<String, HostScript>,
    events: EventLog,
}

impl ScriptedClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, script: HostScript) -> Self {
        self.scripts.insert(host.to_string(), script);
        self
    }

    pub fn events(&self) -> Vec<(String, Event)> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, host: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Hosts in the order they were connected to
    pub fn connected_hosts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(_, event)| *event == Event::Connect)
            .map(|(host, _)| host.clone())
            .collect()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, event)| event == wanted)
            .count()
    }
}

impl ClientFactory for ScriptedClients {
    fn create(&self, remote: RemoteMta, _port: u16) -> Box<dyn SmtpClient> {
        let script = self.scripts.get(remote.host()).cloned().unwrap_or_default();

        Box::new(ScriptedClient {
            remote,
            script,
            recipients_seen: 0,
            events: Arc::clone(&self.events),
        })
    }
}

struct ScriptedClient {
    remote: RemoteMta,
    script: HostScript,
    recipients_seen: usize,
    events: EventLog,
}

impl ScriptedClient {
    fn record(&self, event: Event) {
        self.events
            .lock()
            .push((self.remote.host().to_string(), event));
    }
}

fn reply(scripted: Option<&(u16, String)>) -> Result<(), ClientError> {
    match scripted {
        Some((code, text)) => Err(ClientError::Rejected {
            code: *code,
            lines: vec![text.clone()],
        }),
        None => Ok(()),
    }
}

#[async_trait]
impl SmtpClient for ScriptedClient {
    fn remote_mta(&self) -> &RemoteMta {
        &self.remote
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        self.record(Event::Connect);

        if self.script.drop_connection {
            return Err(ClientError::ConnectionClosed);
        }
        reply(self.script.connect_reply.as_ref())
    }

    async fn mail_from(&mut self, reverse_path: &str) -> Result<(), ClientError> {
        self.record(Event::MailFrom(reverse_path.to_string()));
        reply(self.script.sender_reply.as_ref())
    }

    async fn rcpt_to(&mut self, recipient: &str) -> Result<(), ClientError> {
        self.record(Event::RcptTo(recipient.to_string()));

        if self
            .script
            .drop_after_recipients
            .is_some_and(|count| self.recipients_seen >= count)
        {
            return Err(ClientError::ConnectionClosed);
        }
        self.recipients_seen += 1;

        reply(self.script.rcpt_replies.get(recipient))
    }

    async fn data_start(&mut self) -> Result<(), ClientError> {
        self.record(Event::DataStart);
        Ok(())
    }

    async fn data_write(&mut self, data: &[u8]) -> Result<(), ClientError> {
        self.record(Event::Data(data.to_vec()));
        Ok(())
    }

    async fn data_end(&mut self) -> Result<(), ClientError> {
        self.record(Event::DataEnd);
        reply(self.script.data_end_reply.as_ref())
    }

    async fn quit(&mut self) -> Result<(), ClientError> {
        self.record(Event::Quit);
        Ok(())
    }
}

/// Keeps every mail it is given, or refuses them all.
#[derive(Debug, Default)]
pub struct RecordingTransmitter {
    mails: Mutex<Vec<Mail>>,
    refuse: bool,
}

impl RecordingTransmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Self::default()
        })
    }

    pub fn mails(&self) -> Vec<Mail> {
        self.mails.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.mails.lock().len()
    }
}

#[async_trait]
impl Transmitter for RecordingTransmitter {
    async fn transmit(&self, mail: Mail) -> Result<(), TransmitError> {
        if self.refuse {
            return Err(QueueError::Storage("transmitter refused".to_string()).into());
        }

        self.mails.lock().push(mail);
        Ok(())
    }
}

/// Keeps every mail added, failing once `capacity` is reached.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    mails: Mutex<Vec<Mail>>,
    capacity: Option<usize>,
}

impl RecordingQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_after(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: Some(capacity),
            ..Self::default()
        })
    }

    pub fn mails(&self) -> Vec<Mail> {
        self.mails.lock().clone()
    }
}

#[async_trait]
impl MailQueue for RecordingQueue {
    async fn add(&self, mail: Mail) -> Result<(), QueueError> {
        let mut mails = self.mails.lock();

        if self.capacity.is_some_and(|capacity| mails.len() >= capacity) {
            return Err(QueueError::Storage("disk full".to_string()));
        }

        mails.push(mail);
        Ok(())
    }
}
