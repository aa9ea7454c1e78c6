use subtle::ConstantTimeEq;

use crate::dto::{Recipients, SendEmailRequest};

/// A request that passed authentication and field checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// Each entry may hold several comma separated mailboxes.
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Validation {
    Unauthorized,
    BadRequest { missing: Vec<&'static str> },
    Valid(OutgoingEmail),
}

/// Checks the secret first, then the required fields.
///
/// With no configured secret only requests that carry no secret either are let through.
pub fn validate(request: SendEmailRequest, configured_secret: Option<&str>) -> Validation {
    if !secret_matches(request.secret.as_deref(), configured_secret) {
        tracing::warn!("Unauthorized attempt to send email, invalid API secret");
        return Validation::Unauthorized;
    }

    let to = request
        .to
        .map(Recipients::into_addresses)
        .filter(|addresses| !addresses.is_empty());
    let subject = non_empty(request.subject);
    let html = non_empty(request.html);

    match (to, subject, html) {
        (Some(to), Some(subject), Some(html)) => Validation::Valid(OutgoingEmail {
            to,
            subject,
            html,
            text: non_empty(request.text),
        }),
        (to, subject, html) => {
            let missing: Vec<&'static str> = [
                ("to", to.is_none()),
                ("subject", subject.is_none()),
                ("html", html.is_none()),
            ]
            .into_iter()
            .filter_map(|(field, absent)| absent.then_some(field))
            .collect();

            tracing::warn!(?missing, "Bad request to send email, missing required fields");
            Validation::BadRequest { missing }
        }
    }
}

fn secret_matches(supplied: Option<&str>, configured: Option<&str>) -> bool {
    match (supplied, configured) {
        (Some(supplied), Some(configured)) => supplied.as_bytes().ct_eq(configured.as_bytes()).into(),
        (None, None) => true,
        _ => false,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
