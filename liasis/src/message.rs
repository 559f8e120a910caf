//! Decoded C2S commands and S2C responses, and the bencode list shapes that
//! carry them on the wire (§3, §6).

use crate::bencode::Value;

pub type ClientIdx = u32;
pub type InfoHash = [u8; 20];

/// A client→server command, already shape-validated (arity, element types).
/// `GETCLIENTCOUNT` carries no arguments; everything else is positional per
/// §6's table.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BuildBthFromMetainfo { client_idx: ClientIdx, metainfo: Vec<u8>, initial_active: bool },
    DropBth { client_idx: ClientIdx, info_hash: InfoHash },
    ForceBtcReannounce { client_idx: ClientIdx },
    GetBthData { client_idx: ClientIdx, info_hash: InfoHash },
    GetBthThroughput { client_idx: ClientIdx, info_hash: InfoHash, max_history: u32 },
    GetClientCount,
    GetClientData { client_idx: ClientIdx },
    GetClientTorrents { client_idx: ClientIdx },
    StartBth { client_idx: ClientIdx, info_hash: InfoHash },
    StopBth { client_idx: ClientIdx, info_hash: InfoHash },
    SubscribeBthThroughput { client_idx: ClientIdx },
    UnsubscribeBthThroughput { client_idx: ClientIdx },
}

pub mod tag {
    pub const BUILD_BTH_FROM_METAINFO: &str = "BUILDBTHFROMMETAINFO";
    pub const DROP_BTH: &str = "DROPBTH";
    pub const FORCE_BTC_REANNOUNCE: &str = "FORCEBTCREANNOUNCE";
    pub const GET_BTH_DATA: &str = "GETBTHDATA";
    pub const GET_BTH_THROUGHPUT: &str = "GETBTHTHROUGHPUT";
    pub const GET_CLIENT_COUNT: &str = "GETCLIENTCOUNT";
    pub const GET_CLIENT_DATA: &str = "GETCLIENTDATA";
    pub const GET_CLIENT_TORRENTS: &str = "GETCLIENTTORRENTS";
    pub const START_BTH: &str = "STARTBTH";
    pub const STOP_BTH: &str = "STOPBTH";
    pub const SUBSCRIBE_BTH_THROUGHPUT: &str = "SUBSCRIBEBTHTHROUGHPUT";
    pub const UNSUBSCRIBE_BTH_THROUGHPUT: &str = "UNSUBSCRIBEBTHTHROUGHPUT";

    pub const ARG_ERROR: &str = "ARGERROR";
    pub const BENC_ERROR: &str = "BENCERROR";
    pub const UNKNOWN_CMD: &str = "UNKNOWNCMD";
    pub const RC_REJ: &str = "RCREJ";
    pub const COMMAND_OK: &str = "COMMANDOK";
    pub const COMMAND_NOOP: &str = "COMMANDNOOP";
    pub const COMMAND_FAIL: &str = "COMMANDFAIL";
    pub const CLIENT_COUNT: &str = "CLIENTCOUNT";
    pub const CLIENT_DATA: &str = "CLIENTDATA";
    pub const CLIENT_TORRENTS: &str = "CLIENTTORRENTS";
    pub const BTH_DATA: &str = "BTHDATA";
    pub const BTH_THROUGHPUT: &str = "BTHTHROUGHPUT";
    pub const BTH_THROUGHPUT_SLICE: &str = "BTHTHROUGHPUTSLICE";
    pub const INVALID_CLIENT_COUNT: &str = "INVALIDCLIENTCOUNT";
    pub const INVALID_CLIENT_TORRENTS: &str = "INVALIDCLIENTTORRENTS";
    pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
}

/// Why parsing a decoded bencode list into a [`Command`] failed. Distinct
/// from [`crate::bencode::DecodeError`], which is a lower layer: this is for
/// well-formed bencode whose *shape* doesn't match a known command.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Not a list, an empty list, or the head element isn't a byte string.
    MalformedEnvelope,
    /// The head byte string isn't a recognised tag.
    UnknownTag,
    /// Recognised tag, wrong arity or element type.
    BadArgs(String),
}

/// Decodes the outer envelope (a non-empty list whose head is a byte
/// string) without yet validating the tail against a specific command's
/// schema. Returns the raw tag bytes and the argument tail. The tag is a
/// bencode byte string, not necessarily UTF-8 — a head that fails to decode
/// as UTF-8 is simply a tag nothing recognises (`UnknownTag`), not a
/// malformed envelope (§4.3: a byte-string head *is* "a string").
fn split_envelope(list: &[Value]) -> Result<(&[u8], &[Value]), ParseError> {
    let (head, tail) = list.split_first().ok_or(ParseError::MalformedEnvelope)?;
    let tag = head.as_bytes().ok_or(ParseError::MalformedEnvelope)?;
    Ok((tag, tail))
}

fn want_int(args: &[Value], i: usize, what: &str) -> Result<i64, ParseError> {
    args.get(i)
        .and_then(Value::as_int)
        .ok_or_else(|| ParseError::BadArgs(format!("expected integer argument {} ({})", i, what)))
}

fn want_bytes<'a>(args: &'a [Value], i: usize, what: &str) -> Result<&'a [u8], ParseError> {
    args.get(i)
        .and_then(Value::as_bytes)
        .ok_or_else(|| ParseError::BadArgs(format!("expected byte-string argument {} ({})", i, what)))
}

fn want_client_idx(args: &[Value], i: usize) -> Result<ClientIdx, ParseError> {
    let n = want_int(args, i, "client_idx")?;
    ClientIdx::try_from(n).map_err(|_| ParseError::BadArgs("client_idx must be a non-negative 32-bit integer".into()))
}

fn want_info_hash(args: &[Value], i: usize) -> Result<InfoHash, ParseError> {
    let b = want_bytes(args, i, "info_hash")?;
    InfoHash::try_from(b).map_err(|_| ParseError::BadArgs("info_hash must be exactly 20 bytes".into()))
}

fn want_bool(args: &[Value], i: usize, what: &str) -> Result<bool, ParseError> {
    match want_int(args, i, what)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ParseError::BadArgs(format!("{} must be 0 or 1", what))),
    }
}

fn want_arity(args: &[Value], n: usize, tag: &str) -> Result<(), ParseError> {
    if args.len() != n {
        Err(ParseError::BadArgs(format!(
            "{} takes {} argument(s), got {}",
            tag,
            n,
            args.len()
        )))
    } else {
        Ok(())
    }
}

/// Parses a decoded bencode list into a [`Command`].
pub fn parse_command(list: &[Value]) -> Result<Command, ParseError> {
    let (wire_tag_bytes, args) = split_envelope(list)?;
    // Lossy: a non-UTF-8 tag just won't match any arm below and falls
    // through to `UnknownTag`, which is the correct outcome for it.
    let wire_tag = String::from_utf8_lossy(wire_tag_bytes);
    let wire_tag: &str = &wire_tag;
    use tag::*;
    match wire_tag {
        BUILD_BTH_FROM_METAINFO => {
            want_arity(args, 3, wire_tag)?;
            Ok(Command::BuildBthFromMetainfo {
                client_idx: want_client_idx(args, 0)?,
                metainfo: want_bytes(args, 1, "metainfo_bytes")?.to_vec(),
                initial_active: want_bool(args, 2, "initial_active")?,
            })
        }
        DROP_BTH => {
            want_arity(args, 2, wire_tag)?;
            Ok(Command::DropBth {
                client_idx: want_client_idx(args, 0)?,
                info_hash: want_info_hash(args, 1)?,
            })
        }
        FORCE_BTC_REANNOUNCE => {
            want_arity(args, 1, wire_tag)?;
            Ok(Command::ForceBtcReannounce { client_idx: want_client_idx(args, 0)? })
        }
        GET_BTH_DATA => {
            want_arity(args, 2, wire_tag)?;
            Ok(Command::GetBthData {
                client_idx: want_client_idx(args, 0)?,
                info_hash: want_info_hash(args, 1)?,
            })
        }
        GET_BTH_THROUGHPUT => {
            want_arity(args, 3, wire_tag)?;
            let max_history = want_int(args, 2, "max_history")?;
            let max_history = u32::try_from(max_history)
                .map_err(|_| ParseError::BadArgs("max_history must be a non-negative integer".into()))?;
            Ok(Command::GetBthThroughput {
                client_idx: want_client_idx(args, 0)?,
                info_hash: want_info_hash(args, 1)?,
                max_history,
            })
        }
        GET_CLIENT_COUNT => {
            want_arity(args, 0, wire_tag)?;
            Ok(Command::GetClientCount)
        }
        GET_CLIENT_DATA => {
            want_arity(args, 1, wire_tag)?;
            Ok(Command::GetClientData { client_idx: want_client_idx(args, 0)? })
        }
        GET_CLIENT_TORRENTS => {
            want_arity(args, 1, wire_tag)?;
            Ok(Command::GetClientTorrents { client_idx: want_client_idx(args, 0)? })
        }
        START_BTH => {
            want_arity(args, 2, wire_tag)?;
            Ok(Command::StartBth {
                client_idx: want_client_idx(args, 0)?,
                info_hash: want_info_hash(args, 1)?,
            })
        }
        STOP_BTH => {
            want_arity(args, 2, wire_tag)?;
            Ok(Command::StopBth {
                client_idx: want_client_idx(args, 0)?,
                info_hash: want_info_hash(args, 1)?,
            })
        }
        SUBSCRIBE_BTH_THROUGHPUT => {
            want_arity(args, 1, wire_tag)?;
            Ok(Command::SubscribeBthThroughput { client_idx: want_client_idx(args, 0)? })
        }
        UNSUBSCRIBE_BTH_THROUGHPUT => {
            want_arity(args, 1, wire_tag)?;
            Ok(Command::UnsubscribeBthThroughput { client_idx: want_client_idx(args, 0)? })
        }
        _ => Err(ParseError::UnknownTag),
    }
}

/// A server→client response. Every variant that echoes a request carries the
/// original decoded list verbatim (§3 invariants, §7 echoing discussion).
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    ArgError { original: Vec<Value>, message: String },
    BencError { original_bytes: Vec<u8> },
    UnknownCmd { original: Vec<Value> },
    RcRej { original: Vec<Value> },
    CommandOk { original: Vec<Value> },
    CommandNoop { original: Vec<Value> },
    CommandFail { original: Vec<Value>, message: String, extra: Option<Value> },
    ClientCount { count: u32 },
    ClientData { client_idx: ClientIdx, data: Value },
    ClientTorrents { client_idx: ClientIdx, info_hashes: Vec<InfoHash> },
    BthData { client_idx: ClientIdx, info_hash: InfoHash, data: Value },
    BthThroughput {
        client_idx: ClientIdx,
        info_hash: InfoHash,
        down_cycle_ms: u32,
        down_list: Vec<i64>,
        up_cycle_ms: u32,
        up_list: Vec<i64>,
    },
    BthThroughputSlice { client_idx: ClientIdx, down_list: Vec<i64>, up_list: Vec<i64> },
    InvalidClientCount,
    InvalidClientTorrents { client_idx: ClientIdx },
    Unsubscribe { client_idx: ClientIdx },
}

fn ih_list(hashes: &[InfoHash]) -> Value {
    Value::List(hashes.iter().map(|h| Value::bytes(h.to_vec())).collect())
}

fn int_list(xs: &[i64]) -> Value {
    Value::List(xs.iter().map(|n| Value::Int(*n)).collect())
}

impl Response {
    /// Encodes this response into the bencode list that becomes a frame's
    /// payload, head-tagged per §6.
    pub fn to_value(&self) -> Value {
        use tag::*;
        let list = |t: &str, rest: Vec<Value>| {
            let mut v = vec![Value::str(t)];
            v.extend(rest);
            Value::List(v)
        };
        match self {
            Response::ArgError { original, message } => {
                list(ARG_ERROR, vec![Value::List(original.clone()), Value::str(message)])
            }
            Response::BencError { original_bytes } => {
                list(BENC_ERROR, vec![Value::bytes(original_bytes.clone())])
            }
            Response::UnknownCmd { original } => list(UNKNOWN_CMD, vec![Value::List(original.clone())]),
            Response::RcRej { original } => list(RC_REJ, vec![Value::List(original.clone())]),
            Response::CommandOk { original } => list(COMMAND_OK, vec![Value::List(original.clone())]),
            Response::CommandNoop { original } => list(COMMAND_NOOP, vec![Value::List(original.clone())]),
            Response::CommandFail { original, message, extra } => {
                let mut rest = vec![Value::List(original.clone()), Value::str(message)];
                if let Some(extra) = extra {
                    rest.push(extra.clone());
                }
                list(COMMAND_FAIL, rest)
            }
            Response::ClientCount { count } => list(CLIENT_COUNT, vec![Value::Int(*count as i64)]),
            Response::ClientData { client_idx, data } => {
                list(CLIENT_DATA, vec![Value::Int(*client_idx as i64), data.clone()])
            }
            Response::ClientTorrents { client_idx, info_hashes } => list(
                CLIENT_TORRENTS,
                vec![Value::Int(*client_idx as i64), ih_list(info_hashes)],
            ),
            Response::BthData { client_idx, info_hash, data } => list(
                BTH_DATA,
                vec![Value::Int(*client_idx as i64), Value::bytes(info_hash.to_vec()), data.clone()],
            ),
            Response::BthThroughput { client_idx, info_hash, down_cycle_ms, down_list, up_cycle_ms, up_list } => {
                list(
                    BTH_THROUGHPUT,
                    vec![
                        Value::Int(*client_idx as i64),
                        Value::bytes(info_hash.to_vec()),
                        Value::Int(*down_cycle_ms as i64),
                        int_list(down_list),
                        Value::Int(*up_cycle_ms as i64),
                        int_list(up_list),
                    ],
                )
            }
            // §9 Open Questions: documented as 3 positional args (client_idx,
            // down_list, up_list), not the 4-arg shape the reference doc's
            // stray indices 1/3/4 would imply.
            Response::BthThroughputSlice { client_idx, down_list, up_list } => list(
                BTH_THROUGHPUT_SLICE,
                vec![Value::Int(*client_idx as i64), int_list(down_list), int_list(up_list)],
            ),
            Response::InvalidClientCount => list(INVALID_CLIENT_COUNT, vec![]),
            Response::InvalidClientTorrents { client_idx } => {
                list(INVALID_CLIENT_TORRENTS, vec![Value::Int(*client_idx as i64)])
            }
            Response::Unsubscribe { client_idx } => list(UNSUBSCRIBE, vec![Value::Int(*client_idx as i64)]),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        crate::bencode::encode(&self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode;

    #[test]
    fn parses_well_formed_commands() {
        let list = bencode::decode(b"l15:GETCLIENTCOUNTe").unwrap().into_list().unwrap();
        assert_eq!(parse_command(&list), Ok(Command::GetClientCount));
    }

    #[test]
    fn rejects_unknown_tag() {
        let list = bencode::decode(b"l7:BOGUSCMDe").unwrap().into_list().unwrap();
        assert_eq!(parse_command(&list), Err(ParseError::UnknownTag));
    }

    #[test]
    fn non_utf8_tag_is_unknown_not_malformed() {
        // A bencode byte string head never has to be valid UTF-8; an
        // unrecognisable one is just an unknown tag, not a malformed
        // envelope (§4.3 decision table).
        let list = vec![Value::bytes(vec![0xff, 0xfe, 0x00]), Value::Int(0)];
        assert_eq!(parse_command(&list), Err(ParseError::UnknownTag));
    }

    #[test]
    fn rejects_wrong_arity() {
        // STARTBTH with only a client_idx, missing info_hash
        let list = bencode::decode(b"l8:STARTBTHi0ee").unwrap().into_list().unwrap();
        assert!(matches!(parse_command(&list), Err(ParseError::BadArgs(_))));
    }

    #[test]
    fn echo_fidelity_round_trips_the_original_list() {
        let list = bencode::decode(b"l8:STARTBTHi0ee").unwrap().into_list().unwrap();
        let resp = Response::ArgError { original: list.clone(), message: "bad".into() };
        let encoded = resp.encode();
        let decoded = bencode::decode(&encoded).unwrap().into_list().unwrap();
        // decoded == [ARGERROR, [original list], "bad"]
        let echoed = decoded[1].clone().into_list().unwrap();
        assert_eq!(echoed, list);
    }

    #[test]
    fn client_idx_must_fit_u32() {
        let list = bencode::decode(b"l14:GETCLIENTDATAi-1ee").unwrap().into_list().unwrap();
        assert!(matches!(parse_command(&list), Err(ParseError::BadArgs(_))));
    }
}
