//! HTML paywall hook for browser clients.
//!
//! API clients get the JSON 402 body. A browser navigating to a protected
//! page gets whatever the configured [`Paywall`] renders instead, typically a
//! page that lets the user connect a wallet and pay.

use h402::proto::PaymentRequired;
use http::HeaderMap;
use http::header::ACCEPT;

/// Renders the 402 page shown to browsers.
pub trait Paywall: Send + Sync {
    /// Produces an HTML document for a request that carried no payment.
    fn render(&self, required: &PaymentRequired) -> String;
}

impl<F> Paywall for F
where
    F: Fn(&PaymentRequired) -> String + Send + Sync,
{
    fn render(&self, required: &PaymentRequired) -> String {
        self(required)
    }
}

/// Returns `true` if the `Accept` header asks for HTML.
#[must_use]
pub fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|media| media.trim().starts_with("text/html"))
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn headers(accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers
    }

    #[test]
    fn browser_accept_header_asks_for_html() {
        assert!(accepts_html(&headers(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
        )));
        assert!(!accepts_html(&headers("application/json")));
        assert!(!accepts_html(&headers("*/*")));
        assert!(!accepts_html(&HeaderMap::new()));
    }

    #[test]
    fn closures_are_paywalls() {
        let paywall = |required: &PaymentRequired| format!("<p>{}</p>", required.error);
        let required = PaymentRequired {
            h402_version: 1,
            error: "pay up".into(),
            accepts: vec![],
            payer: None,
        };
        assert_eq!(paywall.render(&required), "<p>pay up</p>");
    }
}
