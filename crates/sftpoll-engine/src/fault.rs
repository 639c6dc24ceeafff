//! Fault replies written back when a file cannot be processed.

use sftpoll_core::ResponsePayload;

/// Fault code for problems with the submitted file.
pub const CLIENT_FAULT: &str = "Client";
/// Fault code for failures on the receiving side.
pub const SERVER_FAULT: &str = "Server";
/// Message used when processing failed without a specific reason.
pub const GENERIC_FAULT_MESSAGE: &str = "message processing failed";

const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Fault reply for an oversized file.
#[must_use]
pub fn size_limit_fault(size: u64, limit: u64, xml: bool) -> ResponsePayload {
    fault_payload(
        CLIENT_FAULT,
        &format!("message size {size} bytes exceeds the limit of {limit} bytes"),
        xml,
    )
}

/// Build a fault reply as a SOAP 1.1 envelope or as `code: message` text.
#[must_use]
pub fn fault_payload(code: &str, message: &str, xml: bool) -> ResponsePayload {
    if !xml {
        return ResponsePayload::raw(format!("{code}: {message}"));
    }
    let code = if code.contains(':') {
        escape_xml(code)
    } else {
        format!("soapenv:{}", escape_xml(code))
    };
    ResponsePayload::xml(format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="{ns}">"#,
            "<soapenv:Body><soapenv:Fault>",
            "<faultcode>{code}</faultcode>",
            "<faultstring>{message}</faultstring>",
            "</soapenv:Fault></soapenv:Body></soapenv:Envelope>"
        ),
        ns = SOAP_ENVELOPE_NS,
        code = code,
        message = escape_xml(message),
    ))
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use sftpoll_core::PayloadKind;

    #[test]
    fn soap_fault_escapes_message() {
        let payload = fault_payload(SERVER_FAULT, "a < b & \"c\"", true);
        assert_eq!(payload.kind, PayloadKind::Xml);
        let body = String::from_utf8(payload.body).expect("utf8");
        assert!(body.contains("<faultcode>soapenv:Server</faultcode>"));
        assert!(body.contains("<faultstring>a &lt; b &amp; &quot;c&quot;</faultstring>"));
        assert!(body.starts_with("<?xml"));
    }

    #[test]
    fn qualified_codes_are_kept() {
        let payload = fault_payload("ns:Custom", "nope", true);
        let body = String::from_utf8(payload.body).expect("utf8");
        assert!(body.contains("<faultcode>ns:Custom</faultcode>"));
    }

    #[test]
    fn plain_text_for_non_xml() {
        let payload = size_limit_fault(2_048, 1_024, false);
        assert_eq!(payload.kind, PayloadKind::Raw);
        assert_eq!(
            payload.body,
            b"Client: message size 2048 bytes exceeds the limit of 1024 bytes"
        );
    }
}
