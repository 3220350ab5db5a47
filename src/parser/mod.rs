//! MIME message decoding.
//!
//! [`decode`] maps `mailparse`'s structured output onto a flat
//! [`ParsedEmail`] record: single comma-joined address strings per role,
//! optional text/html bodies, an attachment flag, and fallbacks for absent
//! subject, message-id and date. The only failure path is a raw byte stream
//! that `mailparse` cannot parse at all.

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use serde::Serialize;

use crate::error::Result;

/// Subject used when the source message has none.
pub const NO_SUBJECT: &str = "(No Subject)";

/// Normalized message record, produced fresh per [`decode`] call.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedEmail {
    /// `Message-ID` header, or a generated time+random value.
    pub message_id: String,
    pub subject: String,
    /// Comma-joined addresses, in header order.
    pub from: String,
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    /// Source folder, carried through verbatim.
    pub folder: String,
    /// True iff at least one attachment part is present.
    pub has_attachments: bool,
    /// `Date` header, or the parse-time clock.
    pub received_at: DateTime<Utc>,
}

/// Parse raw RFC 2822/MIME bytes into a [`ParsedEmail`].
pub fn decode(raw: &[u8], folder: &str) -> Result<ParsedEmail> {
    let mail = mailparse::parse_mail(raw)?;

    let message_id = mail
        .headers
        .get_first_value("Message-ID")
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generated_message_id);

    let subject = mail
        .headers
        .get_first_value("Subject")
        .filter(|subject| !subject.is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let received_at = mail
        .headers
        .get_first_value("Date")
        .and_then(|value| mailparse::dateparse(&value).ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    Ok(ParsedEmail {
        message_id,
        subject,
        from: joined_addresses(&mail, "From"),
        to: joined_addresses(&mail, "To"),
        cc: non_empty(joined_addresses(&mail, "Cc")),
        bcc: non_empty(joined_addresses(&mail, "Bcc")),
        text_body: find_body(&mail, "text/plain"),
        html_body: find_body(&mail, "text/html"),
        folder: folder.to_string(),
        has_attachments: has_attachments(&mail),
        received_at,
    })
}

/// Flatten every occurrence of an address header into one comma-joined
/// string, in original order. Both bare addresses and group members count;
/// entries without a resolvable address are skipped silently.
fn joined_addresses(mail: &ParsedMail<'_>, header: &str) -> String {
    let mut addresses: Vec<String> = Vec::new();

    for raw in mail.headers.get_all_headers(header) {
        let Ok(parsed) = mailparse::addrparse_header(raw) else {
            continue;
        };
        for addr in parsed.iter() {
            match addr {
                MailAddr::Single(single) => {
                    if !single.addr.is_empty() {
                        addresses.push(single.addr.clone());
                    }
                }
                MailAddr::Group(group) => {
                    for member in &group.addrs {
                        if !member.addr.is_empty() {
                            addresses.push(member.addr.clone());
                        }
                    }
                }
            }
        }
    }

    addresses.join(", ")
}

/// Depth-first search for the first non-attachment leaf of the given
/// mimetype, transfer-decoded.
fn find_body(part: &ParsedMail<'_>, mimetype: &str) -> Option<String> {
    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case(mimetype)
            && part.get_content_disposition().disposition != DispositionType::Attachment
        {
            return part.get_body().ok();
        }
        return None;
    }

    part.subparts.iter().find_map(|sub| find_body(sub, mimetype))
}

fn has_attachments(part: &ParsedMail<'_>) -> bool {
    if part.subparts.is_empty() {
        if part.get_content_disposition().disposition == DispositionType::Attachment {
            return true;
        }
        // An inline non-text leaf (image, pdf, ...) still counts.
        let mime = part.ctype.mimetype.to_lowercase();
        return !(mime.starts_with("text/")
            || mime.starts_with("message/")
            || mime.starts_with("multipart/"));
    }

    part.subparts.iter().any(has_attachments)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn generated_message_id() -> String {
    format!(
        "{}-{:016x}",
        Utc::now().timestamp_millis(),
        rand::random::<u64>()
    )
}
