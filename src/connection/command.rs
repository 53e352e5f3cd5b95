use crate::sequence::Sequence;
use crate::stationio::DataStart;
use crate::timeutil::parse_command_time;
use chrono::NaiveDateTime;
use thiserror::Error;

///
/// Why a client command was refused.  The client only ever sees
/// `ERROR`; the reason goes to the log.
///
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command {0}")]
    Unknown(String),
    #[error("wrong number of arguments to {0}")]
    Arguments(String),
    #[error("invalid sequence number '{0}'")]
    BadSequence(String),
    #[error("invalid time '{0}'")]
    BadTime(String),
    #[error("window extraction is not permitted")]
    NoWindowExtraction,
}

///
/// A parsed client command.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Hello,
    Bye,
    End,
    Cat,
    Batch,
    Info(String),
    Station {
        name: String,
        network: Option<String>,
    },
    Select(Option<String>),
    Time {
        begin: NaiveDateTime,
        end: Option<NaiveDateTime>,
    },
    Data {
        start: DataStart,
        realtime: bool,
    },
}

///
/// Split a command line into words; runs of blanks separate.
///
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split(' ').filter(|w| !w.is_empty()).collect()
}
///
/// Commands that act on the current station's cursor.  A malformed
/// one still cancels what the cursor was doing.
///
pub fn station_scoped(verb: &str) -> bool {
    ["SELECT", "TIME", "DATA", "FETCH"]
        .iter()
        .any(|v| v.eq_ignore_ascii_case(verb))
}

fn parse_seq(text: &str) -> Result<Sequence, CommandError> {
    Sequence::parse_hex(text).ok_or_else(|| CommandError::BadSequence(text.to_string()))
}

fn parse_time(text: &str) -> Result<NaiveDateTime, CommandError> {
    parse_command_time(text).ok_or_else(|| CommandError::BadTime(text.to_string()))
}

fn no_args(verb: &str, words: &[&str], request: Request) -> Result<Request, CommandError> {
    if words.len() == 1 {
        Ok(request)
    } else {
        Err(CommandError::Arguments(verb.to_string()))
    }
}

fn parse_data(verb: &str, args: &[&str], window_extraction: bool) -> Result<DataStart, CommandError> {
    match args {
        [] => Ok(DataStart::Live),
        [all] if all.eq_ignore_ascii_case("ALL") => Ok(DataStart::All),
        [seq] => Ok(DataStart::Seq(parse_seq(seq)?)),
        [seq, time] => {
            if !window_extraction {
                return Err(CommandError::NoWindowExtraction);
            }
            Ok(DataStart::SeqTime(parse_seq(seq)?, parse_time(time)?))
        }
        _ => Err(CommandError::Arguments(verb.to_string())),
    }
}
///
/// Parse the words of one command line.  Verbs are case
/// insensitive.  `window_extraction` says whether this client may
/// use time windows.
///
pub fn parse_request(words: &[&str], window_extraction: bool) -> Result<Request, CommandError> {
    let verb = match words.first() {
        Some(v) => v.to_ascii_uppercase(),
        None => return Err(CommandError::Unknown(String::new())),
    };
    let args = &words[1..];
    match verb.as_str() {
        "HELLO" => no_args(&verb, words, Request::Hello),
        "BYE" => no_args(&verb, words, Request::Bye),
        "END" => no_args(&verb, words, Request::End),
        "CAT" => no_args(&verb, words, Request::Cat),
        "BATCH" => no_args(&verb, words, Request::Batch),
        "INFO" => match args {
            [level] => Ok(Request::Info(level.to_string())),
            _ => Err(CommandError::Arguments(verb)),
        },
        "STATION" => match args {
            [name] => Ok(Request::Station {
                name: name.to_string(),
                network: None,
            }),
            [name, network] => Ok(Request::Station {
                name: name.to_string(),
                network: Some(network.to_string()),
            }),
            _ => Err(CommandError::Arguments(verb)),
        },
        "SELECT" => match args {
            [] => Ok(Request::Select(None)),
            [pattern] => Ok(Request::Select(Some(pattern.to_string()))),
            _ => Err(CommandError::Arguments(verb)),
        },
        "TIME" => {
            if !window_extraction {
                return Err(CommandError::NoWindowExtraction);
            }
            match args {
                [begin] => Ok(Request::Time {
                    begin: parse_time(begin)?,
                    end: None,
                }),
                [begin, end] => Ok(Request::Time {
                    begin: parse_time(begin)?,
                    end: Some(parse_time(end)?),
                }),
                _ => Err(CommandError::Arguments(verb)),
            }
        }
        "DATA" => Ok(Request::Data {
            start: parse_data(&verb, args, window_extraction)?,
            realtime: true,
        }),
        "FETCH" => Ok(Request::Data {
            start: parse_data(&verb, args, window_extraction)?,
            realtime: false,
        }),
        _ => Err(CommandError::Unknown(verb)),
    }
}
///
/// How a request appears in the request log: verb upper cased,
/// arguments as given.
///
pub fn describe(words: &[&str]) -> String {
    let mut text = words.first().map_or_else(String::new, |v| v.to_ascii_uppercase());
    for w in words.iter().skip(1) {
        text.push(' ');
        text.push_str(w);
    }
    text
}
