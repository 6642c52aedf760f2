// Othernet wire protocol: one `ProtocolMessage` per line, space-separated
// tokens, terminated by `\n`.
//
//   <TYPE> <R.C.N> <sender_ip> <sender_port> scope:<sR>.<sC>.<sH> <timestamp> <data>

use std::convert::TryFrom;
use std::fmt;

use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, digit1, space1};
use nom::combinator::{map_res, opt, rest};
use nom::sequence::{preceded, tuple};
use nom::IResult;

use crate::address::LogicalAddress;
use crate::error::OthernetError;

/// Maximum byte length of a `ProtocolMessage`'s `data` field.
pub const MAX_DATA_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hello,
    PeerList,
    OthernetMessage,
    HoldRequest,
    HoldResponse,
    DeliveryAttempt,
    DeliveryConfirm,
    CapabilityUpdate,
    Goodbye,
}

impl MessageType {
    fn as_str(&self) -> &'static str {
        match self {
            MessageType::Hello => "HELLO",
            MessageType::PeerList => "PEER_LIST",
            MessageType::OthernetMessage => "OTHERNET_MESSAGE",
            MessageType::HoldRequest => "HOLD_REQUEST",
            MessageType::HoldResponse => "HOLD_RESPONSE",
            MessageType::DeliveryAttempt => "DELIVERY_ATTEMPT",
            MessageType::DeliveryConfirm => "DELIVERY_CONFIRM",
            MessageType::CapabilityUpdate => "CAPABILITY_UPDATE",
            MessageType::Goodbye => "GOODBYE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for MessageType {
    type Error = OthernetError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "HELLO" => Ok(MessageType::Hello),
            "PEER_LIST" => Ok(MessageType::PeerList),
            "OTHERNET_MESSAGE" => Ok(MessageType::OthernetMessage),
            "HOLD_REQUEST" => Ok(MessageType::HoldRequest),
            "HOLD_RESPONSE" => Ok(MessageType::HoldResponse),
            "DELIVERY_ATTEMPT" => Ok(MessageType::DeliveryAttempt),
            "DELIVERY_CONFIRM" => Ok(MessageType::DeliveryConfirm),
            "CAPABILITY_UPDATE" => Ok(MessageType::CapabilityUpdate),
            "GOODBYE" => Ok(MessageType::Goodbye),
            other => Err(OthernetError::DecodeFailed(format!(
                "unknown message type {}",
                other
            ))),
        }
    }
}

/// Discovery scope carried by every message. `ttl` and `max_hops` are
/// reserved fields: carried unchanged, never acted on by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub realm: u16,
    pub cluster: u16,
    pub max_hops: u8,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            realm: 0,
            cluster: 0,
            max_hops: 8,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope:{}.{}.{}", self.realm, self.cluster, self.max_hops)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub msg_type: MessageType,
    pub sender: LogicalAddress,
    pub sender_ip: String,
    pub sender_port: u16,
    pub scope: Scope,
    pub ttl: u8,
    pub timestamp: i64,
    pub data: String,
}

/// Truncate `s` to at most `max` bytes without splitting a multi-byte UTF-8
/// character (`String::truncate` panics if `max` lands mid-character).
pub fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }

    let cut = (0..=max)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    s.truncate(cut);
}

impl ProtocolMessage {
    /// Encode this message as a single line, including the trailing `\n`.
    pub fn encode(&self) -> String {
        let mut data = self.data.clone();
        truncate_utf8(&mut data, MAX_DATA_LEN);

        format!(
            "{} {} {} {} {} {} {}\n",
            self.msg_type,
            self.sender,
            self.sender_ip,
            self.sender_port,
            self.scope,
            self.timestamp,
            data,
        )
    }

    /// Parse a single line (without its trailing newline) into a
    /// `ProtocolMessage`. Tolerates a missing `scope:` token by supplying
    /// `(0, 0, 8)`, per the wire codec's decoding guarantees.
    pub fn parse(line: &str) -> Result<Self, OthernetError> {
        parse_message(line)
            .map(|(_, msg)| msg)
            .map_err(|_| OthernetError::DecodeFailed(line.to_string()))
    }
}

fn parse_message(input: &str) -> IResult<&str, ProtocolMessage> {
    let (input, msg_type_str) = take_while1(|c: char| !c.is_whitespace())(input)?;
    let msg_type = MessageType::try_from(msg_type_str)
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))?;

    let (input, _) = space1(input)?;
    let (input, sender) = take_while1(|c: char| !c.is_whitespace())(input)?;
    let sender: LogicalAddress = sender
        .parse()
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))?;

    let (input, _) = space1(input)?;
    let (input, sender_ip) = take_while1(|c: char| !c.is_whitespace())(input)?;

    let (input, _) = space1(input)?;
    let (input, sender_port) = map_res(digit1, str::parse::<u16>)(input)?;

    let (input, _) = space1(input)?;
    let (input, scope) = opt(parse_scope)(input)?;
    let (input, scope) = match scope {
        Some(scope) => {
            let (input, _) = space1(input)?;
            (input, scope)
        }
        None => (input, Scope::default()),
    };

    let (input, timestamp) = map_res(
        nom::sequence::pair(opt(char('-')), digit1),
        |(neg, digits): (Option<char>, &str)| -> Result<i64, std::num::ParseIntError> {
            let value: i64 = digits.parse()?;
            Ok(if neg.is_some() { -value } else { value })
        },
    )(input)?;

    let (input, data) = opt(preceded(space1, rest))(input)?;
    let data = data.unwrap_or("").to_string();

    Ok((
        input,
        ProtocolMessage {
            msg_type,
            sender,
            sender_ip: sender_ip.to_string(),
            sender_port,
            scope,
            ttl: scope.max_hops,
            timestamp,
            data,
        },
    ))
}

fn parse_scope(input: &str) -> IResult<&str, Scope> {
    let (input, (_, realm, _, cluster, _, max_hops)) = tuple((
        tag("scope:"),
        map_res(digit1, str::parse::<u16>),
        char('.'),
        map_res(digit1, str::parse::<u16>),
        char('.'),
        map_res(digit1, str::parse::<u8>),
    ))(input)?;

    Ok((
        input,
        Scope {
            realm,
            cluster,
            max_hops,
        },
    ))
}
