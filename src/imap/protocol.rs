use crate::imap::{
    FolderAttribute, ImapCapability, ImapError, ImapFolder, ImapResult, MailboxStatus,
    MessageFlag, IMAP_DATE_FORMAT,
};
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;

/// One complete server response: the text of every physical line joined
/// together, with the bytes of each `{n}` literal kept aside in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseLine {
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

impl ResponseLine {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            literals: Vec::new(),
        }
    }

    pub fn with_literal<S: Into<String>>(text: S, literal: Vec<u8>) -> Self {
        Self {
            text: text.into(),
            literals: vec![literal],
        }
    }
}

/// Lexical unit of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Atom(String),
    Quoted(String),
    Literal(Vec<u8>),
    Nil,
    Open,
    Close,
}

impl Token {
    /// Interpret an `astring`/`nstring` token as text.
    pub fn into_text(self) -> Option<String> {
        match self {
            Token::Atom(s) | Token::Quoted(s) => Some(s),
            Token::Literal(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            _ => None,
        }
    }
}

struct Tokenizer<'a> {
    text: &'a [u8],
    pos: usize,
    literals: std::slice::Iter<'a, Vec<u8>>,
}

impl<'a> Tokenizer<'a> {
    fn new(text: &'a str, literals: &'a [Vec<u8>]) -> Self {
        Self {
            text: text.as_bytes(),
            pos: 0,
            literals: literals.iter(),
        }
    }

    fn next_token(&mut self) -> ImapResult<Option<Token>> {
        while self.pos < self.text.len() && self.text[self.pos] == b' ' {
            self.pos += 1;
        }
        if self.pos >= self.text.len() {
            return Ok(None);
        }

        let token = match self.text[self.pos] {
            b'(' => {
                self.pos += 1;
                Token::Open
            }
            b')' => {
                self.pos += 1;
                Token::Close
            }
            b'"' => Token::Quoted(self.quoted()?),
            b'{' => Token::Literal(self.literal()?),
            _ => {
                let atom = self.atom();
                if atom.eq_ignore_ascii_case("NIL") {
                    Token::Nil
                } else {
                    Token::Atom(atom)
                }
            }
        };

        Ok(Some(token))
    }

    fn expect_token(&mut self, context: &str) -> ImapResult<Token> {
        self.next_token()?
            .ok_or_else(|| ImapError::parse(format!("Unexpected end of {} response", context)))
    }

    fn quoted(&mut self) -> ImapResult<String> {
        let mut value = Vec::new();
        self.pos += 1;
        while self.pos < self.text.len() {
            match self.text[self.pos] {
                b'\\' if self.pos + 1 < self.text.len() => {
                    value.push(self.text[self.pos + 1]);
                    self.pos += 2;
                }
                b'"' => {
                    self.pos += 1;
                    return Ok(String::from_utf8_lossy(&value).into_owned());
                }
                byte => {
                    value.push(byte);
                    self.pos += 1;
                }
            }
        }
        Err(ImapError::parse("Unterminated quoted string"))
    }

    fn literal(&mut self) -> ImapResult<Vec<u8>> {
        let end = self.text[self.pos..]
            .iter()
            .position(|&b| b == b'}')
            .map(|offset| self.pos + offset)
            .ok_or_else(|| ImapError::parse("Unterminated literal size"))?;
        let size_str = String::from_utf8_lossy(&self.text[self.pos + 1..end]);
        let size: usize = size_str
            .trim_end_matches('+')
            .parse()
            .map_err(|_| ImapError::parse(format!("Invalid literal size: {}", size_str)))?;
        self.pos = end + 1;

        let literal = self
            .literals
            .next()
            .ok_or_else(|| ImapError::parse("Literal announced but not received"))?;
        if literal.len() != size {
            return Err(ImapError::parse(format!(
                "Literal size mismatch: announced {}, received {}",
                size,
                literal.len()
            )));
        }
        Ok(literal.clone())
    }

    fn atom(&mut self) -> String {
        let start = self.pos;
        let mut bracket_depth = 0usize;
        while self.pos < self.text.len() {
            match self.text[self.pos] {
                b'[' => bracket_depth += 1,
                b']' => bracket_depth = bracket_depth.saturating_sub(1),
                b' ' | b'(' | b')' | b'"' | b'{' if bracket_depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.text[start..self.pos]).into_owned()
    }

    /// Skip one value, including a nested parenthesized list.
    fn skip_value(&mut self) -> ImapResult<()> {
        let mut depth = 0usize;
        loop {
            match self.expect_token("FETCH")? {
                Token::Open => depth += 1,
                Token::Close => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| ImapError::parse("Unbalanced parenthesis"))?;
                }
                _ => {}
            }
            if depth == 0 {
                return Ok(());
            }
        }
    }
}

/// Data items of one untagged FETCH response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchData {
    pub sequence_number: u32,
    pub uid: Option<u32>,
    pub flags: Option<Vec<MessageFlag>>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub size: Option<u32>,
    pub body: Option<Vec<u8>>,
}

/// Command formatting and response parsing, without any I/O
pub struct ImapProtocol;

impl ImapProtocol {
    /// Parse CAPABILITY response
    pub fn parse_capabilities(responses: &[ResponseLine]) -> Vec<ImapCapability> {
        let mut capabilities = Vec::new();

        for response in responses {
            if let Some(caps_str) = strip_prefix_ci(&response.text, "* CAPABILITY ") {
                for cap in caps_str.split_whitespace() {
                    capabilities.push(ImapCapability::parse(cap));
                }
            }
        }

        capabilities
    }

    /// Parse LIST/LSUB responses into folders, keeping server order
    pub fn parse_folders(responses: &[ResponseLine]) -> ImapResult<Vec<ImapFolder>> {
        let mut folders = Vec::new();

        for response in responses {
            let rest = strip_prefix_ci(&response.text, "* LIST ")
                .or_else(|| strip_prefix_ci(&response.text, "* LSUB "));
            if let Some(rest) = rest {
                let offset = response.text.len() - rest.len();
                folders.push(Self::parse_folder_line(&response.text[offset..], &response.literals)?);
            }
        }

        Ok(folders)
    }

    /// Parse the payload of a single LIST response:
    /// `(\HasNoChildren) "/" "INBOX"`
    fn parse_folder_line(payload: &str, literals: &[Vec<u8>]) -> ImapResult<ImapFolder> {
        let mut tokens = Tokenizer::new(payload, literals);

        if tokens.expect_token("LIST")? != Token::Open {
            return Err(ImapError::parse(format!("Invalid LIST response: {}", payload)));
        }
        let mut attributes = Vec::new();
        loop {
            match tokens.expect_token("LIST")? {
                Token::Close => break,
                Token::Atom(attr) => attributes.push(FolderAttribute::parse(&attr)),
                other => {
                    return Err(ImapError::parse(format!(
                        "Unexpected token in LIST attributes: {:?}",
                        other
                    )))
                }
            }
        }

        let delimiter = match tokens.expect_token("LIST")? {
            Token::Nil => None,
            Token::Quoted(d) | Token::Atom(d) => Some(d),
            other => {
                return Err(ImapError::parse(format!(
                    "Unexpected LIST delimiter: {:?}",
                    other
                )))
            }
        };

        let full_name = tokens
            .expect_token("LIST")?
            .into_text()
            .ok_or_else(|| ImapError::parse(format!("Missing mailbox name: {}", payload)))?;

        let mut folder = ImapFolder::new(full_name);
        folder.delimiter = delimiter;
        folder.attributes = attributes;

        Ok(folder)
    }

    /// Parse STATUS responses into `item -> value` for the named mailbox
    pub fn parse_status(responses: &[ResponseLine]) -> ImapResult<HashMap<String, u32>> {
        for response in responses {
            let Some(rest) = strip_prefix_ci(&response.text, "* STATUS ") else {
                continue;
            };
            let offset = response.text.len() - rest.len();
            let mut tokens = Tokenizer::new(&response.text[offset..], &response.literals);

            tokens
                .expect_token("STATUS")?
                .into_text()
                .ok_or_else(|| ImapError::parse("Missing STATUS mailbox"))?;
            if tokens.expect_token("STATUS")? != Token::Open {
                return Err(ImapError::parse(format!("Invalid STATUS response: {}", response.text)));
            }

            let mut items = HashMap::new();
            loop {
                let name = match tokens.expect_token("STATUS")? {
                    Token::Close => break,
                    Token::Atom(name) => name.to_uppercase(),
                    other => {
                        return Err(ImapError::parse(format!(
                            "Unexpected STATUS item: {:?}",
                            other
                        )))
                    }
                };
                let value = match tokens.expect_token("STATUS")? {
                    Token::Atom(value) => value
                        .parse::<u32>()
                        .map_err(|_| ImapError::parse(format!("Invalid {} value: {}", name, value)))?,
                    other => {
                        return Err(ImapError::parse(format!(
                            "Unexpected STATUS value: {:?}",
                            other
                        )))
                    }
                };
                items.insert(name, value);
            }
            return Ok(items);
        }

        Err(ImapError::parse("No STATUS response received"))
    }

    /// Parse SELECT/EXAMINE responses
    pub fn parse_select_response(responses: &[ResponseLine]) -> ImapResult<MailboxStatus> {
        let mut status = MailboxStatus::default();
        let mut saw_exists = false;

        for response in responses {
            let line = response.text.as_str();
            if let Some(count) = line
                .strip_prefix("* ")
                .and_then(|s| strip_suffix_ci(s, " EXISTS"))
            {
                status.exists = count
                    .parse()
                    .map_err(|_| ImapError::parse(format!("Invalid EXISTS count: {}", line)))?;
                saw_exists = true;
            } else if let Some(value) = extract_response_code(line, "UIDVALIDITY") {
                status.uid_validity = value.parse().ok();
            } else if let Some(value) = extract_response_code(line, "UIDNEXT") {
                status.uid_next = value.parse().ok();
            }
        }

        if !saw_exists {
            return Err(ImapError::parse("SELECT response is missing EXISTS"));
        }

        Ok(status)
    }

    /// Parse FETCH responses
    pub fn parse_fetch_response(responses: &[ResponseLine]) -> ImapResult<Vec<FetchData>> {
        let mut messages = Vec::new();

        for response in responses {
            let Some(rest) = response.text.strip_prefix("* ") else {
                continue;
            };
            let mut parts = rest.splitn(3, ' ');
            let (Some(seq), Some(keyword)) = (parts.next(), parts.next()) else {
                continue;
            };
            if !keyword.eq_ignore_ascii_case("FETCH") {
                continue;
            }
            let Ok(sequence_number) = seq.parse::<u32>() else {
                continue;
            };
            let payload = parts.next().unwrap_or("");
            messages.push(Self::parse_fetch_data(sequence_number, payload, &response.literals)?);
        }

        Ok(messages)
    }

    fn parse_fetch_data(
        sequence_number: u32,
        payload: &str,
        literals: &[Vec<u8>],
    ) -> ImapResult<FetchData> {
        let mut tokens = Tokenizer::new(payload, literals);
        let mut data = FetchData {
            sequence_number,
            ..FetchData::default()
        };

        if tokens.expect_token("FETCH")? != Token::Open {
            return Err(ImapError::parse(format!("Invalid FETCH response: {}", payload)));
        }

        loop {
            let key = match tokens.expect_token("FETCH")? {
                Token::Close => break,
                Token::Atom(key) => key.to_uppercase(),
                other => {
                    return Err(ImapError::parse(format!(
                        "Unexpected FETCH item: {:?}",
                        other
                    )))
                }
            };

            match key.as_str() {
                "UID" => data.uid = Some(Self::number(tokens.expect_token("FETCH")?, "UID")?),
                "RFC822.SIZE" => {
                    data.size = Some(Self::number(tokens.expect_token("FETCH")?, "RFC822.SIZE")?)
                }
                "FLAGS" => {
                    if tokens.expect_token("FETCH")? != Token::Open {
                        return Err(ImapError::parse("FLAGS is not a list"));
                    }
                    let mut flags = Vec::new();
                    loop {
                        match tokens.expect_token("FETCH")? {
                            Token::Close => break,
                            Token::Atom(flag) => flags.push(MessageFlag::parse(&flag)),
                            other => {
                                return Err(ImapError::parse(format!(
                                    "Unexpected flag token: {:?}",
                                    other
                                )))
                            }
                        }
                    }
                    data.flags = Some(flags);
                }
                "INTERNALDATE" => match tokens.expect_token("FETCH")? {
                    Token::Quoted(date) => data.internal_date = Some(Self::parse_internal_date(&date)?),
                    other => {
                        return Err(ImapError::parse(format!(
                            "Unexpected INTERNALDATE: {:?}",
                            other
                        )))
                    }
                },
                "BODY[]" | "RFC822" => match tokens.expect_token("FETCH")? {
                    Token::Literal(bytes) => data.body = Some(bytes),
                    Token::Quoted(text) => data.body = Some(text.into_bytes()),
                    Token::Nil => data.body = None,
                    other => {
                        return Err(ImapError::parse(format!("Unexpected body: {:?}", other)))
                    }
                },
                _ => tokens.skip_value()?,
            }
        }

        Ok(data)
    }

    fn number(token: Token, what: &str) -> ImapResult<u32> {
        match token {
            Token::Atom(value) => value
                .parse()
                .map_err(|_| ImapError::parse(format!("Invalid {}: {}", what, value))),
            other => Err(ImapError::parse(format!("Invalid {}: {:?}", what, other))),
        }
    }

    /// Parse SEARCH response
    pub fn parse_search_response(responses: &[ResponseLine]) -> ImapResult<Vec<u32>> {
        let mut message_ids = Vec::new();

        for response in responses {
            let text = response.text.trim_end();
            let ids = if text.eq_ignore_ascii_case("* SEARCH") {
                ""
            } else if let Some(ids) = strip_prefix_ci(text, "* SEARCH ") {
                ids
            } else {
                continue;
            };
            for id_str in ids.split_whitespace() {
                let id = id_str
                    .parse::<u32>()
                    .map_err(|_| ImapError::parse(format!("Invalid SEARCH result: {}", id_str)))?;
                message_ids.push(id);
            }
        }

        Ok(message_ids)
    }

    /// Parse an IMAP `date-time` such as ` 7-Jul-1996 02:44:25 -0700`
    pub fn parse_internal_date(date: &str) -> ImapResult<DateTime<FixedOffset>> {
        DateTime::parse_from_str(date.trim(), IMAP_DATE_FORMAT)
            .map_err(|e| ImapError::parse(format!("Invalid INTERNALDATE {:?}: {}", date, e)))
    }

    /// Render a `date-time` in the fixed-width form APPEND expects
    pub fn format_internal_date(date: &DateTime<FixedOffset>) -> String {
        date.format("%e-%b-%Y %H:%M:%S %z").to_string()
    }

    /// Quote a string argument
    pub fn quote(value: &str) -> String {
        let mut quoted = String::with_capacity(value.len() + 2);
        quoted.push('"');
        for ch in value.chars() {
            if ch == '"' || ch == '\\' {
                quoted.push('\\');
            }
            quoted.push(ch);
        }
        quoted.push('"');
        quoted
    }

    /// Whether a value can travel as a quoted string at all
    pub fn is_quotable(value: &str) -> bool {
        value.bytes().all(|b| (0x01..0x80).contains(&b) && b != b'\r' && b != b'\n')
    }

    pub fn format_login(username: &str, password: &str) -> String {
        format!("LOGIN {} {}", Self::quote(username), Self::quote(password))
    }

    /// SASL PLAIN initial response: base64(\0username\0password)
    pub fn plain_auth_payload(username: &str, password: &str) -> String {
        use base64::{engine::general_purpose, Engine as _};
        general_purpose::STANDARD.encode(format!("\0{}\0{}", username, password))
    }

    /// Read-only SELECT
    pub fn format_examine(folder: &str) -> String {
        format!("EXAMINE {}", Self::quote(folder))
    }

    pub fn format_list(reference: &str, pattern: &str) -> String {
        format!("LIST {} {}", Self::quote(reference), Self::quote(pattern))
    }

    pub fn format_uid_fetch(uid_set: &str, items: &[&str]) -> String {
        format!("UID FETCH {} ({})", uid_set, items.join(" "))
    }

    pub fn format_uid_search(criteria: &str) -> String {
        format!("UID SEARCH {}", criteria)
    }

    pub fn format_create(folder: &str) -> String {
        format!("CREATE {}", Self::quote(folder))
    }

    /// `STATUS folder (item ...)`
    pub fn format_status(folder: &str, items: &[&str]) -> String {
        format!("STATUS {} ({})", Self::quote(folder), items.join(" "))
    }

    /// Format the APPEND command up to and including the literal announcement
    pub fn format_append(
        folder: &str,
        flags: &[MessageFlag],
        internal_date: Option<&DateTime<FixedOffset>>,
        size: usize,
    ) -> String {
        let mut command = format!("APPEND {}", Self::quote(folder));
        let flags: Vec<&str> = flags
            .iter()
            .filter(|flag| flag.is_settable())
            .map(|flag| flag.as_imap())
            .collect();
        if !flags.is_empty() {
            command.push_str(&format!(" ({})", flags.join(" ")));
        }
        if let Some(date) = internal_date {
            command.push(' ');
            command.push_str(&Self::quote(&Self::format_internal_date(date)));
        }
        command.push_str(&format!(" {{{}}}", size));
        command
    }
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

fn strip_suffix_ci<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    let split = text.len().checked_sub(suffix.len())?;
    if text.is_char_boundary(split) && text[split..].eq_ignore_ascii_case(suffix) {
        Some(&text[..split])
    } else {
        None
    }
}

/// Extract the argument of a bracketed response code, e.g. `[UIDVALIDITY 42]`
fn extract_response_code<'a>(line: &'a str, code: &str) -> Option<&'a str> {
    let upper = line.to_ascii_uppercase();
    let marker = format!("[{} ", code);
    let start = upper.find(&marker)? + marker.len();
    let end = line[start..].find(']')? + start;
    Some(line[start..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn lines(texts: &[&str]) -> Vec<ResponseLine> {
        texts.iter().map(|t| ResponseLine::new(*t)).collect()
    }

    #[test]
    fn test_parse_capabilities() {
        let response = lines(&["* CAPABILITY IMAP4rev1 STARTTLS AUTH=PLAIN LOGINDISABLED"]);
        let capabilities = ImapProtocol::parse_capabilities(&response);

        assert!(capabilities.contains(&ImapCapability::Imap4Rev1));
        assert!(capabilities.contains(&ImapCapability::StartTls));
        assert!(capabilities.contains(&ImapCapability::AuthPlain));
        assert!(capabilities.contains(&ImapCapability::LoginDisabled));
    }

    #[test]
    fn test_parse_folder_lines_keep_server_order() {
        let response = lines(&[
            "* LIST (\\HasChildren) \"/\" \"INBOX\"",
            "* LIST (\\HasNoChildren) \"/\" INBOX/Work",
            "* LIST (\\Noselect \\HasChildren) \"/\" \"[Gmail]\"",
            "* LIST () NIL \"Flat \\\"quoted\\\"\"",
        ]);
        let folders = ImapProtocol::parse_folders(&response).unwrap();

        let names: Vec<&str> = folders.iter().map(|f| f.full_name.as_str()).collect();
        assert_eq!(names, vec!["INBOX", "INBOX/Work", "[Gmail]", "Flat \"quoted\""]);
        assert_eq!(folders[0].delimiter, Some("/".to_string()));
        assert!(folders[0].has_children());
        assert!(!folders[2].is_selectable());
        assert_eq!(folders[3].delimiter, None);
    }

    #[test]
    fn test_parse_folder_name_sent_as_literal() {
        let response = vec![ResponseLine::with_literal(
            "* LIST (\\HasNoChildren) \".\" {8}",
            b"My Stuff".to_vec(),
        )];
        let folders = ImapProtocol::parse_folders(&response).unwrap();
        assert_eq!(folders[0].full_name, "My Stuff");
        assert_eq!(folders[0].delimiter, Some(".".to_string()));
    }

    #[test]
    fn test_malformed_list_is_a_parse_error() {
        let response = lines(&["* LIST \\HasNoChildren \"/\" INBOX"]);
        assert!(matches!(
            ImapProtocol::parse_folders(&response),
            Err(ImapError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_status() {
        let response = lines(&["* STATUS \"INBOX/Work\" (MESSAGES 3 UIDNEXT 44)"]);
        let status = ImapProtocol::parse_status(&response).unwrap();
        assert_eq!(status.get("MESSAGES"), Some(&3));
        assert_eq!(status.get("UIDNEXT"), Some(&44));
    }

    #[test]
    fn test_parse_select_response() {
        let response = lines(&[
            "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)",
            "* 172 EXISTS",
            "* 1 RECENT",
            "* OK [UIDVALIDITY 3857529045] UIDs valid",
            "* OK [UIDNEXT 4392] Predicted next UID",
        ]);
        let status = ImapProtocol::parse_select_response(&response).unwrap();
        assert_eq!(status.exists, 172);
        assert_eq!(status.uid_validity, Some(3857529045));
        assert_eq!(status.uid_next, Some(4392));
    }

    #[test]
    fn test_parse_fetch_with_literal_body() {
        let body = b"Subject: hi\r\n\r\n(parens) and \"quotes\"\r\n".to_vec();
        let response = vec![ResponseLine::with_literal(
            format!(
                "* 12 FETCH (UID 4827 FLAGS (\\Seen $Forwarded) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" BODY[] {{{}}})",
                body.len()
            ),
            body.clone(),
        )];
        let messages = ImapProtocol::parse_fetch_response(&response).unwrap();

        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.sequence_number, 12);
        assert_eq!(message.uid, Some(4827));
        assert_eq!(
            message.flags,
            Some(vec![
                MessageFlag::Seen,
                MessageFlag::Custom("$Forwarded".to_string())
            ])
        );
        let date = message.internal_date.unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (1996, 7, 17));
        assert_eq!(date.hour(), 2);
        assert_eq!(date.offset().local_minus_utc(), -7 * 3600);
        assert_eq!(message.body.as_deref(), Some(body.as_slice()));
    }

    #[test]
    fn test_parse_fetch_skips_unknown_items() {
        let response = lines(&[
            "* 3 FETCH (MODSEQ (12345) X-GM-LABELS (\\Inbox \"Work\") UID 9 FLAGS ())",
        ]);
        let messages = ImapProtocol::parse_fetch_response(&response).unwrap();
        assert_eq!(messages[0].uid, Some(9));
        assert_eq!(messages[0].flags, Some(vec![]));
        assert_eq!(messages[0].body, None);
    }

    #[test]
    fn test_literal_size_mismatch_is_rejected() {
        let response = vec![ResponseLine::with_literal(
            "* 1 FETCH (UID 1 BODY[] {10})",
            b"short".to_vec(),
        )];
        assert!(ImapProtocol::parse_fetch_response(&response).is_err());
    }

    #[test]
    fn test_parse_search_response() {
        let response = lines(&["* SEARCH 2 84 882"]);
        assert_eq!(
            ImapProtocol::parse_search_response(&response).unwrap(),
            vec![2, 84, 882]
        );
        let empty = lines(&["* SEARCH"]);
        assert!(ImapProtocol::parse_search_response(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_internal_date_round_trip_keeps_offset() {
        let date = ImapProtocol::parse_internal_date(" 7-Feb-2020 23:01:02 +0530").unwrap();
        assert_eq!(date.day(), 7);
        assert_eq!(date.offset().local_minus_utc(), 5 * 3600 + 30 * 60);
        let rendered = ImapProtocol::format_internal_date(&date);
        assert_eq!(rendered, " 7-Feb-2020 23:01:02 +0530");
        assert_eq!(ImapProtocol::parse_internal_date(&rendered).unwrap(), date);
    }

    #[test]
    fn test_format_commands() {
        assert_eq!(
            ImapProtocol::format_login("user", "pa\"ss\\"),
            "LOGIN \"user\" \"pa\\\"ss\\\\\""
        );
        assert_eq!(ImapProtocol::format_examine("INBOX"), "EXAMINE \"INBOX\"");
        assert_eq!(ImapProtocol::format_list("", "*"), "LIST \"\" \"*\"");
        assert_eq!(
            ImapProtocol::format_uid_fetch("7", &["UID", "FLAGS"]),
            "UID FETCH 7 (UID FLAGS)"
        );
        assert_eq!(
            ImapProtocol::format_status("INBOX", &["MESSAGES"]),
            "STATUS \"INBOX\" (MESSAGES)"
        );
    }

    #[test]
    fn test_format_append_drops_recent() {
        let date = ImapProtocol::parse_internal_date("17-Jul-1996 02:44:25 -0700").unwrap();
        let command = ImapProtocol::format_append(
            "&BCQEMAQ6BEIEQwMBBEAEOA-",
            &[MessageFlag::Seen, MessageFlag::Recent, MessageFlag::Flagged],
            Some(&date),
            310,
        );
        assert_eq!(
            command,
            "APPEND \"&BCQEMAQ6BEIEQwMBBEAEOA-\" (\\Seen \\Flagged) \"17-Jul-1996 02:44:25 -0700\" {310}"
        );
        assert_eq!(
            ImapProtocol::format_append("INBOX", &[], None, 5),
            "APPEND \"INBOX\" {5}"
        );
    }

    #[test]
    fn test_plain_auth_payload() {
        assert_eq!(
            ImapProtocol::plain_auth_payload("tim", "tanstaaftanstaaf"),
            "AHRpbQB0YW5zdGFhZnRhbnN0YWFm"
        );
    }
}
