use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Signs `url` for the Google Maps Platform by computing an HMAC-SHA1 over its path and query
/// with the decoded signing secret and appending it as the `signature` parameter.
///
/// See: https://developers.google.com/maps/documentation/maps-static/digital-signature
pub fn sign_url(url: &Url, secret: &[u8]) -> Result<Url> {
    let query = url
        .query()
        .ok_or_else(|| anyhow!("cannot sign URL without a query string: {}", url))?;
    let to_sign = format!("{}?{}", url.path(), query);

    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|err| anyhow!("invalid URL signing secret: {}", err))?;
    mac.update(to_sign.as_bytes());
    let signature = URL_SAFE.encode(mac.finalize().into_bytes());

    let mut signed = url.clone();
    signed.set_query(Some(&format!("{}&signature={}", query, signature)));
    Ok(signed)
}
