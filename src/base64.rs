use thiserror::Error;

/// base64url 解碼過程中可能出現的錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 遇到不屬於 URL 安全字母表的字元，包含該字元的 ASCII 值。
    #[error("Invalid character: {0}")]
    InvalidCharacter(u8),

    /// 未填充的 base64url 字串長度除以 4 餘 1，不可能是合法編碼。
    #[error("Invalid length")]
    InvalidLength,

    /// 最後一個字元帶有不屬於任何位元組的非零位元，例如 `"YR"`。
    #[error("Non-zero trailing bits")]
    TrailingBits,
}

// URL 安全字母表（RFC 4648 §5），`-` 與 `_` 取代標準表中的 `+` 與 `/`。
const URL_SAFE_CHARS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// 將任意位元組編碼為不含填充符號的 base64url 字串。
///
/// JWS 的 `protected`、`payload`、`signature` 三個欄位，以及 JWK 中的
/// 所有大整數欄位都使用此格式。
///
/// # 範例
///
/// ```
/// use acme_engine::base64::encode;
/// assert_eq!(encode("Hello, World!"), "SGVsbG8sIFdvcmxkIQ");
/// assert_eq!(encode(""), "");
/// ```
pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
    let bytes = input.as_ref();
    let mut output = String::with_capacity((bytes.len() * 4 + 2) / 3);

    for chunk in bytes.chunks(3) {
        let b1 = chunk[0];
        let b2 = chunk.get(1).copied().unwrap_or(0);
        let b3 = chunk.get(2).copied().unwrap_or(0);

        output.push(URL_SAFE_CHARS[(b1 >> 2) as usize] as char);
        output.push(URL_SAFE_CHARS[((b1 & 0x03) << 4 | (b2 >> 4)) as usize] as char);
        if chunk.len() > 1 {
            output.push(URL_SAFE_CHARS[((b2 & 0x0F) << 2 | (b3 >> 6)) as usize] as char);
        }
        if chunk.len() > 2 {
            output.push(URL_SAFE_CHARS[(b3 & 0x3F) as usize] as char);
        }
    }

    output
}

/// 解碼不含填充符號的 base64url 字串。
///
/// 標準 base64 的 `+`、`/` 與 `=` 都會被視為無效字元。
///
/// # 錯誤
///
/// 可能返回 [`DecodeError::InvalidCharacter`]、[`DecodeError::InvalidLength`]，
/// 非標準編碼（末尾多餘位元不為零）返回 [`DecodeError::TrailingBits`]。
pub fn decode(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    let bytes = encoded.as_bytes();
    if bytes.len() % 4 == 1 {
        return Err(DecodeError::InvalidLength);
    }

    let mut buffer = Vec::with_capacity(bytes.len() * 3 / 4);

    for chunk in bytes.chunks(4) {
        let mut group = 0u32;
        for (i, &c) in chunk.iter().enumerate() {
            group |= (decode_char(c)? as u32) << (18 - 6 * i);
        }

        let unused = match chunk.len() {
            2 => group & 0xFFFF,
            3 => group & 0xFF,
            _ => 0,
        };
        if unused != 0 {
            return Err(DecodeError::TrailingBits);
        }

        buffer.push((group >> 16) as u8);
        if chunk.len() > 2 {
            buffer.push((group >> 8 & 0xFF) as u8);
        }
        if chunk.len() > 3 {
            buffer.push((group & 0xFF) as u8);
        }
    }

    Ok(buffer)
}

/// 根據 URL 安全字母表返回字元對應的 6 位元數值。
fn decode_char(c: u8) -> Result<u8, DecodeError> {
    match c {
        b'A'..=b'Z' => Ok(c - b'A'),
        b'a'..=b'z' => Ok(c - b'a' + 26),
        b'0'..=b'9' => Ok(c - b'0' + 52),
        b'-' => Ok(62),
        b'_' => Ok(63),
        _ => Err(DecodeError::InvalidCharacter(c)),
    }
}
