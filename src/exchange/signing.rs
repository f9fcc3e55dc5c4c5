use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `message`
pub fn hmac_hex(secret: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| Error::Signing(format!("failed to init signer: {err}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Binance signed query string
///
/// Parameters are encoded in insertion order, `timestamp` is appended and
/// the signature over the whole query goes last.
pub fn binance_query(params: &[(&str, String)], timestamp_ms: i64, secret: &str) -> Result<String> {
    let mut pairs: Vec<(&str, String)> = params.to_vec();
    pairs.push(("timestamp", timestamp_ms.to_string()));

    let query = serde_urlencoded::to_string(&pairs)
        .map_err(|err| Error::Signing(format!("failed to encode params: {err}")))?;
    let signature = hmac_hex(secret, &query)?;
    Ok(format!("{query}&signature={signature}"))
}

/// Bitmex request signature over `VERB + path[?query] + expires`
pub fn bitmex_signature(
    secret: &str,
    verb: &str,
    path: &str,
    query: &str,
    expires: i64,
) -> Result<String> {
    let message = if query.is_empty() {
        format!("{verb}{path}{expires}")
    } else {
        format!("{verb}{path}?{query}{expires}")
    };
    hmac_hex(secret, &message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binance_signature_vector() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

        assert_eq!(
            hmac_hex(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_binance_query_layout() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let params = vec![
            ("symbol", "LTCBTC".to_string()),
            ("side", "BUY".to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", "1".to_string()),
            ("price", "0.1".to_string()),
            ("recvWindow", "5000".to_string()),
        ];

        let query = binance_query(&params, 1499827319559, secret).unwrap();
        assert_eq!(
            query,
            "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559\
             &signature=c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_bitmex_signature_vector() {
        let secret = "chNOOS4KvNXR_Xq4k4c9qsfoKWvnDecLATCRlcBwyKDYnWgO";
        let signature = bitmex_signature(secret, "GET", "/api/v1/instrument", "", 1518064236).unwrap();

        assert_eq!(
            signature,
            "c7682d435d0cfe87c16098df34ef2eb5a549d4c5a3c2b1f0f77b8af73423bf00"
        );
    }

    #[test]
    fn test_bitmex_signature_includes_query() {
        let secret = "chNOOS4KvNXR_Xq4k4c9qsfoKWvnDecLATCRlcBwyKDYnWgO";
        let with_query =
            bitmex_signature(secret, "GET", "/api/v1/user/margin", "currency=all", 1518064236).unwrap();
        let expected = hmac_hex(secret, "GET/api/v1/user/margin?currency=all1518064236").unwrap();
        assert_eq!(with_query, expected);
    }
}
