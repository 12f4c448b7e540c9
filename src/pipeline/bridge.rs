//! Application request → network request, and back.

use flate2::read::GzDecoder;
use log::debug;

use crate::body::ResponseBody;
use crate::chain::{Chain, Interceptor};
use crate::cookie::Cookie;
use crate::ext::UriExt;
use crate::response::Response;
use crate::Error;

const DEFAULT_USER_AGENT: &str = concat!("callwire/", env!("CARGO_PKG_VERSION"));

/// Fills in the headers the protocol needs but applications rarely set,
/// carries cookies both ways, and makes gzip transfer invisible: when the
/// engine itself asked for gzip, the response body is decoded before the
/// application sees it.
pub(crate) struct Bridge;

impl Interceptor for Bridge {
    fn intercept(&self, chain: &mut Chain<'_>) -> Result<Response, Error> {
        let user_request = chain.request().clone();
        let client = chain.call().client().clone();
        let mut builder = user_request.new_builder();

        if let Some(body) = user_request.body() {
            if user_request.header("Content-Type").is_none() {
                if let Some(content_type) = body.content_type() {
                    builder = builder.header("Content-Type", content_type);
                }
            }
            match body.content_length() {
                Some(length) => {
                    if user_request.header("Content-Length").is_none() {
                        builder = builder
                            .header("Content-Length", &length.to_string())
                            .remove_header("Transfer-Encoding");
                    }
                }
                None => {
                    if user_request.header("Transfer-Encoding").is_none() {
                        builder = builder
                            .header("Transfer-Encoding", "chunked")
                            .remove_header("Content-Length");
                    }
                }
            }
        }

        if user_request.header("Host").is_none() {
            let host = user_request
                .url()
                .host_header()
                .ok_or_else(|| Error::BadUrl(format!("url has no host: {}", user_request.url())))?;
            builder = builder.header("Host", &host);
        }

        if user_request.header("Connection").is_none() {
            builder = builder.header("Connection", "Keep-Alive");
        }

        // If we add the Accept-Encoding ourselves, we are also responsible
        // for decoding the transfer stream.
        let mut transparent_gzip = false;
        if user_request.header("Accept-Encoding").is_none() && user_request.header("Range").is_none()
        {
            transparent_gzip = true;
            builder = builder.header("Accept-Encoding", "gzip");
        }

        let cookies = client.inner.cookie_jar.load_for_request(user_request.url());
        if !cookies.is_empty() {
            builder = builder.header("Cookie", &cookie_header(&cookies));
        }

        if user_request.header("User-Agent").is_none() {
            builder = builder.header("User-Agent", DEFAULT_USER_AGENT);
        }

        let network_request = builder.build()?;
        let network_response = chain.proceed(network_request)?;

        let set_cookies: Vec<Cookie> = network_response
            .headers()
            .values("set-cookie")
            .into_iter()
            .filter_map(Cookie::parse)
            .collect();
        if !set_cookies.is_empty() {
            client
                .inner
                .cookie_jar
                .save_from_response(user_request.url(), set_cookies);
        }

        let unzip = transparent_gzip
            && network_response
                .header("Content-Encoding")
                .map(|v| v.eq_ignore_ascii_case("gzip"))
                .unwrap_or(false)
            && promises_body(&network_response);

        let mut builder = network_response.new_builder().request(user_request);
        if unzip {
            debug!("transparently decoding gzip response body");
            builder = builder
                .remove_header("Content-Encoding")
                .remove_header("Content-Length")
                .map_body(|body| {
                    body.map(|b| {
                        let content_type = b.content_type().map(str::to_string);
                        // Decompressed length is unknown until read.
                        ResponseBody::new(content_type.as_deref(), None, GzDecoder::new(b))
                    })
                });
        }
        Ok(builder.build())
    }
}

/// Whether HTTP semantics give this response a body at all.
fn promises_body(response: &Response) -> bool {
    !matches!(response.code(), 100..=199 | 204 | 205 | 304)
}

/// `n1=v1; n2=v2` in jar order.
fn cookie_header(cookies: &[Cookie]) -> String {
    let mut header = String::new();
    for (i, cookie) in cookies.iter().enumerate() {
        if i > 0 {
            header.push_str("; ");
        }
        header.push_str(cookie.name());
        header.push('=');
        header.push_str(cookie.value());
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_joins_in_order() {
        let cookies = vec![Cookie::new("a", "1"), Cookie::new("b", "2")];
        assert_eq!(cookie_header(&cookies), "a=1; b=2");
    }
}
