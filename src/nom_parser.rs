//! Parser for the JSON text form of a frame.
//!
//! The grammar is deliberately loose: anything before the opening brace is
//! skipped, fields may come in any order, tags are matched case-insensitively
//! on their single letter and whitespace is accepted between all tokens.

use core::convert::TryFrom;

use nom::branch::alt;
use nom::bytes::complete::{take_till, take_while};
use nom::character::complete::{anychar, char, digit1, multispace0, one_of};
use nom::combinator::{map, map_opt, map_res, opt};
use nom::error::{Error as NomError, ErrorKind};
use nom::multi::separated_list0;
use nom::sequence::{delimited, preceded};
use nom::IResult;

type Buf = [u8];

/// Decimal number as written in the text, fraction cut to hundredths.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub(crate) struct Number {
    pub negative: bool,
    pub int_part: u32,
    pub hundredths: u8,
}

impl Number {
    /// Integer part with sign.
    pub fn to_i64(self) -> i64 {
        let int = i64::from(self.int_part);
        if self.negative {
            -int
        } else {
            int
        }
    }
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub(crate) enum FieldToken {
    Sender(Number),
    Receiver(Number),
    Acknowledge(Number),
    Key(u8),
    Value(Number),
    Checksum,
}

/// Parse one `{...}` object, returning the fields in the order they appear.
pub(crate) fn parse_object(buf: &Buf) -> IResult<&Buf, Vec<FieldToken>> {
    let (buf, _garbage) = take_till(|c| c == b'{')(buf)?;
    delimited(
        char('{'),
        separated_list0(char(','), ws(field)),
        preceded(multispace0, char('}')),
    )(buf)
}

fn field(buf: &Buf) -> IResult<&Buf, FieldToken> {
    let (buf, tag) = delimited(char('"'), ws(anychar), char('"'))(buf)?;
    let (buf, _) = ws(char(':'))(buf)?;
    match tag.to_ascii_uppercase() {
        'S' => map(number, FieldToken::Sender)(buf),
        'R' => map(number, FieldToken::Receiver)(buf),
        'A' => map(number, FieldToken::Acknowledge)(buf),
        'V' => map(number, FieldToken::Value)(buf),
        'K' => alt((
            map(quoted_char, FieldToken::Key),
            map_opt(number, |n| {
                if n.negative {
                    None
                } else {
                    u8::try_from(n.int_part).ok().map(FieldToken::Key)
                }
            }),
        ))(buf),
        'C' => map(alt((map(quoted, |_| ()), map(number, |_| ()))), |_| {
            FieldToken::Checksum
        })(buf),
        _ => Err(nom::Err::Error(NomError::new(buf, ErrorKind::Tag))),
    }
}

fn quoted_char(buf: &Buf) -> IResult<&Buf, u8> {
    map(delimited(char('"'), anychar, char('"')), |c| c as u8)(buf)
}

fn quoted(buf: &Buf) -> IResult<&Buf, &Buf> {
    delimited(char('"'), take_while(|c| c != b'"'), char('"'))(buf)
}

fn number(buf: &Buf) -> IResult<&Buf, Number> {
    let (buf, sign) = opt(ws(one_of("+-")))(buf)?;
    let (buf, int_part) = map_int(digit1)(buf)?;
    let (buf, fraction) = opt(preceded(char('.'), digit1))(buf)?;
    let hundredths = fraction.map_or(0, |digits: &Buf| {
        let tenths = digits[0] - b'0';
        let rest = digits.get(1).map_or(0, |d| d - b'0');
        tenths * 10 + rest
    });
    Ok((
        buf,
        Number {
            negative: sign == Some('-'),
            int_part,
            hundredths,
        },
    ))
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a Buf) -> IResult<&'a Buf, O>
where
    F: FnMut(&'a Buf) -> IResult<&'a Buf, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn map_int<'a, O, F>(first: F) -> impl FnMut(&'a Buf) -> IResult<&'a Buf, O>
where
    F: Fn(&'a Buf) -> IResult<&'a Buf, &'a Buf>,
    O: std::str::FromStr,
{
    let to_str = map_res(first, |u: &'a Buf| std::str::from_utf8(u));
    map_res(to_str, |s| s.parse::<O>())
}
