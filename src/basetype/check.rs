use super::{OCTET_STREAM, TEXT_PLAIN};

/// If there are any null bytes, return False. Otherwise return True.
fn is_text_plain_from_u8(b: &[u8]) -> bool
{
	!b.contains(&0)
}

/// Whether a byte stream is of the given base type.
pub fn from_u8(b: &[u8], mimetype: &str) -> bool
{
	match mimetype {
		// True if we have a bytestream at all
		OCTET_STREAM => true,
		TEXT_PLAIN => is_text_plain_from_u8(b),
		_ => false
	}
}

/// The most specific base type of a byte stream.
pub fn fallback(b: &[u8]) -> &'static str
{
	if is_text_plain_from_u8(b) { TEXT_PLAIN } else { OCTET_STREAM }
}
