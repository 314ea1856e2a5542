//! NNTP wire grammar for the serving edge
//!
//! Response codes and command parsing per RFC 3977, limited to the
//! capability surface the backend exposes.

/// NNTP response codes (RFC 3977)
pub mod codes {
    /// Capability list follows
    pub const CAPABILITY_LIST: u16 = 101;
    /// Server ready, posting allowed
    pub const READY_POSTING_ALLOWED: u16 = 200;
    /// Closing connection
    pub const CLOSING_CONNECTION: u16 = 205;
    /// Group selected
    pub const GROUP_SELECTED: u16 = 211;
    /// List of newsgroups follows
    pub const LIST_INFORMATION_FOLLOWS: u16 = 215;
    /// Article follows
    pub const ARTICLE_FOLLOWS: u16 = 220;
    /// Article posted successfully
    pub const ARTICLE_POSTED: u16 = 240;
    /// Authentication accepted
    pub const AUTH_ACCEPTED: u16 = 281;
    /// Send article to be posted
    pub const SEND_ARTICLE: u16 = 340;
    /// Continue with authentication
    pub const AUTH_CONTINUE: u16 = 381;
    /// Internal fault
    pub const INTERNAL_FAULT: u16 = 403;
    /// No such newsgroup
    pub const NO_SUCH_GROUP: u16 = 411;
    /// No newsgroup selected
    pub const NO_GROUP_SELECTED: u16 = 412;
    /// No article with that number
    pub const NO_SUCH_ARTICLE_NUMBER: u16 = 423;
    /// No article with that message-id
    pub const NO_SUCH_ARTICLE_ID: u16 = 430;
    /// Posting failed
    pub const POSTING_FAILED: u16 = 441;
    /// Authentication out of sequence
    pub const AUTH_OUT_OF_SEQUENCE: u16 = 482;
    /// Command not recognized
    pub const COMMAND_NOT_RECOGNIZED: u16 = 500;
    /// Command syntax error
    pub const COMMAND_SYNTAX_ERROR: u16 = 501;
}

/// LIST variants served by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKeyword {
    /// `LIST` / `LIST ACTIVE`: name, high, low, posting flag
    Active,
    /// `LIST NEWSGROUPS`: name and description
    Newsgroups,
}

/// ARTICLE argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleRef {
    /// Article number within the selected group
    Number(i64),
    /// Message-id, angle brackets included
    MessageId(String),
}

/// One parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Capabilities,
    ModeReader,
    AuthinfoUser(String),
    AuthinfoPass(String),
    List(ListKeyword),
    Group(String),
    Article(ArticleRef),
    Post,
    Quit,
    /// Recognized verb with unusable arguments
    Syntax(String),
    /// Verb this server does not implement
    Unknown(String),
}

/// Parse one command line
///
/// Verbs and subcommand keywords are case-insensitive; arguments are taken
/// verbatim (an AUTHINFO PASS argument may contain spaces).
pub fn parse_command(line: &str) -> Command {
    let line = line.trim_end();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim_start()),
        None => (line, ""),
    };

    match verb.to_ascii_uppercase().as_str() {
        "CAPABILITIES" => Command::Capabilities,
        "MODE" => {
            if rest.eq_ignore_ascii_case("READER") {
                Command::ModeReader
            } else {
                Command::Syntax("MODE".to_string())
            }
        }
        "AUTHINFO" => {
            let (sub, arg) = match rest.split_once(char::is_whitespace) {
                Some((sub, arg)) => (sub, arg.trim_start()),
                None => (rest, ""),
            };
            match sub.to_ascii_uppercase().as_str() {
                "USER" if !arg.is_empty() => Command::AuthinfoUser(arg.to_string()),
                "PASS" if !arg.is_empty() => Command::AuthinfoPass(arg.to_string()),
                _ => Command::Syntax("AUTHINFO".to_string()),
            }
        }
        "LIST" => match rest.to_ascii_uppercase().as_str() {
            "" | "ACTIVE" => Command::List(ListKeyword::Active),
            "NEWSGROUPS" => Command::List(ListKeyword::Newsgroups),
            _ => Command::Syntax("LIST".to_string()),
        },
        "GROUP" => {
            if rest.is_empty() {
                Command::Syntax("GROUP".to_string())
            } else {
                Command::Group(rest.to_string())
            }
        }
        "ARTICLE" => {
            if rest.starts_with('<') {
                Command::Article(ArticleRef::MessageId(rest.to_string()))
            } else if let Ok(number) = rest.parse::<i64>() {
                Command::Article(ArticleRef::Number(number))
            } else {
                Command::Syntax("ARTICLE".to_string())
            }
        }
        "POST" => Command::Post,
        "QUIT" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

/// Single status line, CRLF-terminated
pub fn format_status(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}

/// Frame article bytes for a multiline response
///
/// Line endings are normalized to CRLF, lines starting with a dot are
/// stuffed, and the block always ends with CRLF so the terminator the
/// session appends stands on its own line.
pub fn dot_stuff_block(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut at_line_start = true;
    let mut prev = 0u8;

    for &byte in data {
        if byte == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
        prev = byte;
    }
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Remove dot-stuffing from one received line
pub fn strip_byte_stuffing(line: &str) -> &str {
    if line.starts_with("..") { &line[1..] } else { line }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_verbs() {
        assert_eq!(parse_command("CAPABILITIES"), Command::Capabilities);
        assert_eq!(parse_command("MODE READER"), Command::ModeReader);
        assert_eq!(parse_command("mode reader"), Command::ModeReader);
        assert_eq!(parse_command("POST"), Command::Post);
        assert_eq!(parse_command("QUIT"), Command::Quit);
    }

    #[test]
    fn test_parse_authinfo() {
        assert_eq!(
            parse_command("AUTHINFO USER alice"),
            Command::AuthinfoUser("alice".to_string())
        );
        assert_eq!(
            parse_command("AUTHINFO PASS p w d"),
            Command::AuthinfoPass("p w d".to_string())
        );
        assert_eq!(
            parse_command("AUTHINFO USER"),
            Command::Syntax("AUTHINFO".to_string())
        );
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_command("LIST"), Command::List(ListKeyword::Active));
        assert_eq!(
            parse_command("LIST ACTIVE"),
            Command::List(ListKeyword::Active)
        );
        assert_eq!(
            parse_command("LIST newsgroups"),
            Command::List(ListKeyword::Newsgroups)
        );
        assert_eq!(
            parse_command("LIST OVERVIEW.FMT"),
            Command::Syntax("LIST".to_string())
        );
    }

    #[test]
    fn test_parse_group_and_article() {
        assert_eq!(
            parse_command("GROUP alt.test"),
            Command::Group("alt.test".to_string())
        );
        assert_eq!(
            parse_command("ARTICLE 42"),
            Command::Article(ArticleRef::Number(42))
        );
        assert_eq!(
            parse_command("ARTICLE <1@test>"),
            Command::Article(ArticleRef::MessageId("<1@test>".to_string()))
        );
        assert_eq!(
            parse_command("ARTICLE abc"),
            Command::Syntax("ARTICLE".to_string())
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            parse_command("XOVER 1-100"),
            Command::Unknown("XOVER".to_string())
        );
    }

    #[test]
    fn test_format_status() {
        assert_eq!(format_status(200, "ready"), "200 ready\r\n");
    }

    #[test]
    fn test_dot_stuffing_block() {
        assert_eq!(dot_stuff_block(b"plain\r\n"), b"plain\r\n");
        assert_eq!(dot_stuff_block(b".dot\r\n"), b"..dot\r\n");
        assert_eq!(dot_stuff_block(b"a\n.b\n"), b"a\r\n..b\r\n");
        assert_eq!(dot_stuff_block(b"no newline"), b"no newline\r\n");
    }

    #[test]
    fn test_strip_byte_stuffing() {
        assert_eq!(strip_byte_stuffing("..dot"), ".dot");
        assert_eq!(strip_byte_stuffing("plain"), "plain");
        assert_eq!(strip_byte_stuffing("."), ".");
        assert_eq!(strip_byte_stuffing("..."), "..");
    }
}
