//! The SMTP client capability consumed by the delivery engine, and a tokio
//! TCP implementation of it.

pub mod client;

pub use client::{
    ClientError, ClientFactory, Response, SmtpClient, SmtpTimeouts, TcpClientFactory,
    TcpSmtpClient,
};
