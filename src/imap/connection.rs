use async_imap::{Client, Session};
use async_native_tls::TlsStream;
use tokio::net::TcpStream;
use tracing::info;

use crate::config::AccountConfig;
use crate::error::{MailwatchError, Result};

// An IMAP session is generic over the stream type — in our case,
// TLS-encrypted TCP.
pub type ImapSession = Session<TlsStream<TcpStream>>;

/// Open a TLS connection to the account's IMAP server and log in.
pub async fn connect(account: &AccountConfig) -> Result<ImapSession> {
    info!(host = %account.host, port = account.port, "connecting to IMAP server");

    let tcp = TcpStream::connect((account.host.as_str(), account.port))
        .await
        .map_err(|e| MailwatchError::Session(format!("TCP connection failed: {}", e)))?;

    let tls = async_native_tls::TlsConnector::new();
    let tls_stream = tls
        .connect(&account.host, tcp)
        .await
        .map_err(|e| MailwatchError::Session(format!("TLS handshake failed: {}", e)))?;

    let client = Client::new(tls_stream);

    let session = client
        .login(&account.email, &account.password)
        .await
        .map_err(|(e, _)| MailwatchError::Session(format!("login failed: {}", e)))?;

    info!(email = %account.email, "IMAP session established");
    Ok(session)
}
