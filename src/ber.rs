//! BER-TLV encoding and decoding.
//!
//! Only the subset the ISD-R actually speaks to us is supported: multi-byte tags
//! are fine, but lengths must fit a single byte below 0x80. The long forms
//! (0x81 XX, 0x82 XX XX) are refused rather than guessed at.

use nom::bytes::complete::take;
use nom::error::ErrorKind;
use nom::number::complete::be_u8;
use thiserror::Error;

pub type IResult<'a, T> = nom::IResult<&'a [u8], T, TlvError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TlvError {
    #[error("no data")]
    Empty,

    #[error("tag runs past the end of the buffer")]
    TruncatedTag,

    #[error("missing length byte")]
    MissingLength,

    #[error("long-form length prefix {0:#04x} is not supported")]
    LongFormLength(u8),

    #[error("declared length {declared} runs past the end of the buffer ({available} bytes left)")]
    Truncated { declared: usize, available: usize },

    #[error("{0} trailing bytes after the element")]
    TrailingData(usize),

    #[error("value of {0} bytes doesn't fit a single-byte length")]
    ValueTooLong(usize),

    #[error("missing tag {0:02X?}")]
    MissingTag(Vec<u8>),

    #[error("{0:?}")]
    Nom(ErrorKind),
}

impl nom::error::ParseError<&[u8]> for TlvError {
    fn from_error_kind(input: &[u8], kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Eof if input.is_empty() => Self::Empty,
            kind => Self::Nom(kind),
        }
    }

    fn append(_input: &[u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl From<nom::Err<TlvError>> for TlvError {
    fn from(e: nom::Err<TlvError>) -> Self {
        match e {
            nom::Err::Error(err) => err,
            nom::Err::Failure(err) => err,
            nom::Err::Incomplete(_) => Self::Nom(ErrorKind::Eof),
        }
    }
}

/// A decoded TLV element. The length isn't stored; it's always the byte length
/// of the encoded value, so the two can't disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvNode {
    pub tag: Vec<u8>,
    pub value: TlvValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvValue {
    Primitive(Vec<u8>),
    Constructed(Vec<TlvNode>),
}

/// Bit 6 of the first tag byte marks a constructed (nested) data object.
pub fn is_constructed(tag: &[u8]) -> bool {
    tag.first().map_or(false, |b| b & 0x20 != 0)
}

impl TlvNode {
    pub fn primitive<T: Into<Vec<u8>>, V: Into<Vec<u8>>>(tag: T, value: V) -> Self {
        Self {
            tag: tag.into(),
            value: TlvValue::Primitive(value.into()),
        }
    }

    pub fn constructed<T: Into<Vec<u8>>>(tag: T, children: Vec<TlvNode>) -> Self {
        Self {
            tag: tag.into(),
            value: TlvValue::Constructed(children),
        }
    }

    /// Length of the encoded value, ie. what goes in the length byte.
    pub fn len(&self) -> usize {
        match &self.value {
            TlvValue::Primitive(v) => v.len(),
            TlvValue::Constructed(children) => children.iter().map(Self::encoded_len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the whole element: tag, length byte and value.
    pub fn encoded_len(&self) -> usize {
        self.tag.len() + 1 + self.len()
    }

    /// The raw value of a primitive element.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            TlvValue::Primitive(v) => Some(v),
            TlvValue::Constructed(_) => None,
        }
    }

    pub fn children(&self) -> &[TlvNode] {
        match &self.value {
            TlvValue::Primitive(_) => &[],
            TlvValue::Constructed(children) => children,
        }
    }

    /// Depth-first search for a tag, starting with this element.
    pub fn find(&self, tag: &[u8]) -> Option<&TlvNode> {
        if self.tag == tag {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(tag))
    }

    pub fn encode(&self) -> Result<Vec<u8>, TlvError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), TlvError> {
        let len = self.len();
        if len > 0x7F {
            return Err(TlvError::ValueTooLong(len));
        }
        out.extend_from_slice(&self.tag);
        out.push(len as u8);
        match &self.value {
            TlvValue::Primitive(v) => out.extend_from_slice(v),
            TlvValue::Constructed(children) => {
                for child in children {
                    child.encode_into(out)?;
                }
            }
        }
        Ok(())
    }
}

/// Parses a raw TLV tag as a byte sequence. If the lower 5 bits of the first byte are all
/// set, the next byte is read, and subsequent bytes may set their highest bit to keep going.
pub fn parse_tag(input: &[u8]) -> IResult<&[u8]> {
    if input.is_empty() {
        return Err(nom::Err::Error(TlvError::Empty));
    }
    for (i, v) in input.iter().enumerate() {
        let more_mask = if i == 0 { 0x1F } else { 0x80 };
        if *v & more_mask != more_mask {
            let (tag, rest) = input.split_at(i + 1);
            return Ok((rest, tag));
        }
    }
    Err(nom::Err::Failure(TlvError::TruncatedTag))
}

/// Parses a single-byte length. Anything with bit 8 set is a long-form prefix and refused.
pub fn parse_len(input: &[u8]) -> IResult<usize> {
    let (rest, first) = be_u8::<_, TlvError>(input)
        .map_err(|_| nom::Err::Failure(TlvError::MissingLength))?;
    if first & 0x80 != 0 {
        return Err(nom::Err::Failure(TlvError::LongFormLength(first)));
    }
    Ok((rest, first as usize))
}

fn take_value(len: usize) -> impl Fn(&[u8]) -> IResult<&[u8]> {
    move |input: &[u8]| {
        if input.len() < len {
            return Err(nom::Err::Failure(TlvError::Truncated {
                declared: len,
                available: input.len(),
            }));
        }
        take(len)(input)
    }
}

/// Parses a raw tag-value pair.
pub fn parse_next(input: &[u8]) -> IResult<(&[u8], &[u8])> {
    let (input, tag) = parse_tag(input)?;
    let (input, len) = parse_len(input)?;
    let (input, value) = take_value(len)(input)?;
    Ok((input, (tag, value)))
}

/// Parses a length byte followed by that many bytes of value. Unlike [`parse_len`], the
/// length byte is taken as a raw count, with no long-form interpretation; this is how
/// the eUICC list responses are walked.
pub fn parse_short_value(input: &[u8]) -> IResult<&[u8]> {
    let (input, len) = be_u8::<_, TlvError>(input)?;
    take_value(len as usize)(input)
}

/// Parses one element, descending into constructed values.
pub fn parse_node(input: &[u8]) -> IResult<TlvNode> {
    let (rest, (tag, value)) = parse_next(input)?;
    let value = if is_constructed(tag) {
        TlvValue::Constructed(decode_all(value).map_err(nom::Err::Failure)?)
    } else {
        TlvValue::Primitive(value.to_vec())
    };
    Ok((
        rest,
        TlvNode {
            tag: tag.to_vec(),
            value,
        },
    ))
}

/// Decodes exactly one element; trailing bytes are an error.
pub fn decode(input: &[u8]) -> Result<TlvNode, TlvError> {
    let (rest, node) = parse_node(input)?;
    if !rest.is_empty() {
        return Err(TlvError::TrailingData(rest.len()));
    }
    Ok(node)
}

/// Decodes a sequence of sibling elements.
pub fn decode_all(mut input: &[u8]) -> Result<Vec<TlvNode>, TlvError> {
    let mut nodes = Vec::new();
    while !input.is_empty() {
        let (rest, node) = parse_node(input)?;
        nodes.push(node);
        input = rest;
    }
    Ok(nodes)
}

/// Finds the first occurrence of a tag's bytes at or after `from`.
///
/// This is a plain byte scan, not a structural walk: a match may land inside a
/// sibling's value. Callers accept that; the eUICC payloads it's used on don't
/// produce such collisions in practice.
pub fn find_first_tag(buf: &[u8], tag: &[u8], from: usize) -> Option<usize> {
    if tag.is_empty() {
        return None;
    }
    buf.get(from..)?
        .windows(tag.len())
        .position(|w| w == tag)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag() {
        assert_eq!(
            (&[0x02, 0x03, 0x04][..], &[0x4F][..]),
            parse_tag(&[0x4F, 0x02, 0x03, 0x04][..]).unwrap(),
        );
        assert_eq!(
            (&[0x02, 0x03, 0x04][..], &[0xBF, 0x2F][..]),
            parse_tag(&[0xBF, 0x2F, 0x02, 0x03, 0x04][..]).unwrap(),
        );
        assert_eq!(
            (&[0x01][..], &[0x9F, 0x70][..]),
            parse_tag(&[0x9F, 0x70, 0x01][..]).unwrap(),
        );
    }

    #[test]
    fn test_parse_tag_truncated() {
        assert_eq!(
            Err(nom::Err::Failure(TlvError::TruncatedTag)),
            parse_tag(&[0xBF][..])
        );
        assert_eq!(Err(nom::Err::Error(TlvError::Empty)), parse_tag(&[][..]));
    }

    #[test]
    fn test_parse_len() {
        assert_eq!((&[][..], 2), parse_len(&[0x02][..]).unwrap());
        assert_eq!((&[][..], 0x7F), parse_len(&[0x7F][..]).unwrap());
        assert_eq!(
            Err(nom::Err::Failure(TlvError::LongFormLength(0x81))),
            parse_len(&[0x81, 0xFF][..])
        );
        assert_eq!(
            Err(nom::Err::Failure(TlvError::LongFormLength(0x82))),
            parse_len(&[0x82, 0x01, 0x67][..])
        );
    }

    #[test]
    fn test_parse_next() {
        assert_eq!(
            (
                &[0x9F, 0x70, 0x01, 0x01][..],
                (&[0x5A][..], &[0x98, 0x44][..])
            ),
            parse_next(&[0x5A, 0x02, 0x98, 0x44, 0x9F, 0x70, 0x01, 0x01][..]).unwrap(),
        );
    }

    #[test]
    fn test_parse_next_overrun() {
        assert_eq!(
            Err(nom::Err::Failure(TlvError::Truncated {
                declared: 4,
                available: 2
            })),
            parse_next(&[0x5A, 0x04, 0x98, 0x44][..]),
        );
    }

    #[test]
    fn test_parse_short_value() {
        // 0x90 would be a long-form prefix to parse_len, but here it's just a count.
        let mut input = vec![0x90];
        input.extend(std::iter::repeat(0xAB).take(0x90));
        input.push(0x00);
        let (rest, value) = parse_short_value(&input).unwrap();
        assert_eq!(value.len(), 0x90);
        assert_eq!(rest, &[0x00]);
    }

    #[test]
    fn test_decode_nested() {
        let node = decode(&hex::decode("bf2d08a006e3045a020102").unwrap()).unwrap();
        assert_eq!(
            node,
            TlvNode::constructed(
                [0xBF, 0x2D],
                vec![TlvNode::constructed(
                    [0xA0],
                    vec![TlvNode::constructed(
                        [0xE3],
                        vec![TlvNode::primitive([0x5A], [0x01, 0x02])]
                    )]
                )]
            )
        );
        assert_eq!(node.find(&[0x5A]).and_then(|n| n.bytes()), Some(&[0x01, 0x02][..]));
        assert_eq!(node.len(), 8);
    }

    #[test]
    fn test_decode_refuses_long_form() {
        // The head of a real notification list response.
        assert_eq!(
            decode(&hex::decode("bf28820167a0820163").unwrap()),
            Err(TlvError::LongFormLength(0x82))
        );
    }

    #[test]
    fn test_decode_overrun_in_child() {
        assert_eq!(
            decode(&hex::decode("bf3003800501").unwrap()),
            Err(TlvError::Truncated {
                declared: 5,
                available: 1
            })
        );
    }

    #[test]
    fn test_decode_trailing() {
        assert_eq!(
            decode(&hex::decode("800101ff").unwrap()),
            Err(TlvError::TrailingData(1))
        );
    }

    #[test]
    fn test_round_trip() {
        let node = TlvNode::constructed(
            [0xBF, 0x2F],
            vec![
                TlvNode::primitive([0x80], [0x14]),
                TlvNode::primitive([0x81], [0x07, 0x80]),
                TlvNode::primitive([0x0C], "smdp.io".as_bytes()),
                TlvNode::primitive([0x5A], hex::decode("984474560000309161f5").unwrap()),
                TlvNode::constructed([0xA0], vec![]),
            ],
        );
        let encoded = node.encode().unwrap();
        assert_eq!(encoded.len(), node.encoded_len());
        assert_eq!(
            hex::encode(&encoded),
            "bf2f1e800114810207800c07736d64702e696f5a0a984474560000309161f5a000"
        );
        assert_eq!(decode(&encoded).unwrap(), node);
    }

    #[test]
    fn test_round_trip_shapes() {
        let nodes = [
            // Empty primitive.
            TlvNode::primitive([0x80], vec![]),
            // Three levels of nesting.
            TlvNode::constructed(
                [0xBF, 0x2D],
                vec![TlvNode::constructed(
                    [0xA0],
                    vec![TlvNode::constructed(
                        [0xE3],
                        vec![
                            TlvNode::primitive([0x5A], [0x98, 0x44]),
                            TlvNode::primitive([0x9F, 0x70], [0x01]),
                        ],
                    )],
                )],
            ),
            // Three-byte tag.
            TlvNode::primitive([0x9F, 0x81, 0x01], [0xAA, 0xBB]),
            // Longest value a single length byte can carry.
            TlvNode::primitive([0x04], vec![0x55; 0x7F]),
        ];
        for node in nodes {
            let encoded = node.encode().unwrap();
            assert_eq!(encoded.len(), node.encoded_len(), "{:?}", node);
            assert_eq!(decode(&encoded).unwrap(), node);
        }
    }

    #[test]
    fn test_encode_too_long() {
        let node = TlvNode::primitive([0x80], vec![0u8; 0x80]);
        assert_eq!(node.encode(), Err(TlvError::ValueTooLong(0x80)));
    }

    #[test]
    fn test_find_first_tag() {
        let buf = hex::decode("00bf2f01bf2f").unwrap();
        assert_eq!(find_first_tag(&buf, &[0xBF, 0x2F], 0), Some(1));
        assert_eq!(find_first_tag(&buf, &[0xBF, 0x2F], 2), Some(4));
        assert_eq!(find_first_tag(&buf, &[0xBF, 0x2F], 5), None);
        assert_eq!(find_first_tag(&buf, &[0xBF, 0x2F], 99), None);
    }

    #[test]
    fn test_find_first_tag_false_positive() {
        // The scan isn't structural; a tag pattern inside a value matches too.
        let buf = hex::decode("8002bf2f").unwrap();
        assert_eq!(find_first_tag(&buf, &[0xBF, 0x2F], 0), Some(2));
    }
}
