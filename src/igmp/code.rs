
//! Max Resp Code / QQIC conversion.
//!
//! Codes below 128 are the value itself. Codes from 128 up are a small
//! floating-point number:
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! |1| exp | mant  |
//! +-+-+-+-+-+-+-+-+
//! value = (mant | 0x10) << (exp + 3)
//! ```

/// Decodes a Max Resp Code or QQIC byte.
pub fn code_to_value(code: u8) -> u32 {
    if code < 128 {
        return code as u32;
    }
    let mantissa = (code & 0x0f) as u32;
    let exponent = ((code >> 4) & 0x07) as u32;
    (mantissa | 0x10) << (exponent + 3)
}

/// Encodes a value, using the exact code when one exists and the next lower
/// representable value otherwise. Values beyond the largest code saturate to 255.
pub fn value_to_code(value: u32) -> u8 {
    if value < 128 {
        return value as u8;
    }

    // decoded values grow monotonically with the code above 127
    for code in 128u8..=255 {
        let code_value = code_to_value(code);
        if code_value == value {
            return code;
        } else if code_value > value {
            return code - 1;
        }
    }
    255
}
