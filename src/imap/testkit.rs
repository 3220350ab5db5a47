//! Scripted in-memory IMAP server for session-level tests.

use async_imap::{Client, Session};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// Build a logged-in session whose peer is a scripted server over an
/// in-memory duplex stream.
///
/// The server answers the LOGIN itself, then replies to each subsequent
/// command line with the next entry of `replies`, substituting `{tag}` with
/// the command's tag. Entries carry their own CRLF line endings and may span
/// several lines (untagged data before the tagged completion).
pub(crate) async fn scripted_session(replies: Vec<&'static str>) -> Session<DuplexStream> {
    let (client_side, server_side) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(server_side);
        let mut lines = BufReader::new(read_half).lines();

        if write_half.write_all(b"* OK ready\r\n").await.is_err() {
            return;
        }

        if let Ok(Some(login)) = lines.next_line().await {
            let tag = first_token(&login);
            let reply = format!("{} OK LOGIN completed\r\n", tag);
            if write_half.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }

        let mut script = replies.into_iter();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(reply) = script.next() else {
                break;
            };
            let reply = reply.replace("{tag}", first_token(&line));
            if write_half.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let client = Client::new(client_side);
    client
        .login("tester@example.com", "secret")
        .await
        .map_err(|(e, _)| e)
        .expect("scripted login should succeed")
}

fn first_token(line: &str) -> &str {
    line.split(' ').next().unwrap_or("*")
}
