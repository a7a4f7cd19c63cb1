use std::io::{self, Write};

use http::StatusCode;

/// Writes a small HTML error page and returns the number of bytes sent.
pub fn write_error<W>(out: &mut W, status: StatusCode, cause: &str, detail: &str) -> io::Result<u64>
where
    W: Write,
{
    let page = error_page(status, cause, detail);
    out.write_all(&page)?;
    out.flush()?;
    Ok(page.len() as u64)
}

pub fn error_page(status: StatusCode, cause: &str, detail: &str) -> Vec<u8> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let code = status.as_u16();
    let body = format!(
        "<html><title>Proxy Error</title><body bgcolor=\"ffffff\">\r\n\
         {code}: {reason}\r\n\
         <p>{detail}: {cause}\r\n\
         <hr><em>The Proxy server</em>\r\n</body></html>\r\n",
        cause = escape_html(cause),
        detail = escape_html(detail),
    );
    let head = format!(
        "HTTP/1.0 {code} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut page = head.into_bytes();
    page.extend_from_slice(body.as_bytes());
    page
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
