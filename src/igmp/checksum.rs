
/// Offset of the checksum field, shared by every IGMP message type.
pub const CHECKSUM_OFFSET: usize = 2;

fn ones_complement_sum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum
}

/// RFC 1071 checksum of a buffer whose checksum field is already zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    !(ones_complement_sum(data) as u16)
}

/// Computes the IGMP checksum of a whole message, treating the checksum
/// field as zero. Messages shorter than the checksum field yield `None`.
pub fn compute_checksum(message: &[u8]) -> Option<u16> {
    if message.len() < CHECKSUM_OFFSET + 2 {
        return None;
    }
    let head = ones_complement_sum(&message[..CHECKSUM_OFFSET]);
    let tail = ones_complement_sum(&message[(CHECKSUM_OFFSET + 2)..]);
    let mut sum = head + tail;
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    Some(!(sum as u16))
}

/// Reads the checksum currently stored in a message.
pub fn stored_checksum(message: &[u8]) -> Option<u16> {
    if message.len() < CHECKSUM_OFFSET + 2 {
        return None;
    }
    Some(u16::from_be_bytes([message[CHECKSUM_OFFSET], message[CHECKSUM_OFFSET + 1]]))
}

/// Computes the checksum and stores it in place.
pub fn set_checksum(message: &mut [u8]) -> Option<u16> {
    let checksum = compute_checksum(message)?;
    message[CHECKSUM_OFFSET..(CHECKSUM_OFFSET + 2)].copy_from_slice(&checksum.to_be_bytes());
    Some(checksum)
}

pub fn verify_checksum(message: &[u8]) -> bool {
    match (stored_checksum(message), compute_checksum(message)) {
        (Some(stored), Some(computed)) => stored == computed,
        _ => false,
    }
}
