//! RFC 5322 / MIME reading for saved `.eml` messages.
//!
//! Only what the digest needs: the Message-ID and the body most likely to
//! carry listing links, with its transfer encoding removed. An HTML part is
//! preferred over a plain-text one; attachments are ignored.

use mailparse::{DispositionType, MailHeaderMap, ParsedMail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEmail {
    /// Message-ID without angle brackets.
    pub message_id: Option<String>,
    pub body: String,
}

/// Decode a raw message. Input that does not parse as a message is returned
/// as the body unchanged, so a mislabelled file still gets scanned.
pub fn parse_email(raw: &[u8]) -> ParsedEmail {
    let mail = match mailparse::parse_mail(raw) {
        Ok(mail) => mail,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable email, scanning raw bytes");
            return ParsedEmail {
                message_id: None,
                body: String::from_utf8_lossy(raw).into_owned(),
            };
        }
    };

    let message_id = mail
        .headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().trim_matches(|c| c == '<' || c == '>').to_string())
        .filter(|v| !v.is_empty());

    let part = find_part(&mail, "text/html")
        .or_else(|| find_part(&mail, "text/plain"))
        .unwrap_or(&mail);

    let body = match part.get_body() {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, mimetype = %part.ctype.mimetype, "Undecodable body part");
            String::from_utf8_lossy(part.get_body_raw().unwrap_or_default().as_slice()).into_owned()
        }
    };

    ParsedEmail { message_id, body }
}

/// First inline leaf part of `mimetype`, depth first.
fn find_part<'m, 'a>(mail: &'m ParsedMail<'a>, mimetype: &str) -> Option<&'m ParsedMail<'a>> {
    if mail.subparts.is_empty() {
        let attachment = mail.get_content_disposition().disposition == DispositionType::Attachment;
        let matches = mail.ctype.mimetype.eq_ignore_ascii_case(mimetype);
        return (matches && !attachment).then_some(mail);
    }
    mail.subparts.iter().find_map(|part| find_part(part, mimetype))
}
