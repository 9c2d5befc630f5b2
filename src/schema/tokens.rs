/// Lexical token classes of SQLite DDL text. Only as much lexing as is needed to find
/// identifiers reliably: string literals, quoted identifiers and comments are kept whole
/// so an identifier is never matched inside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    QuotedIdent,
    Str,
    Number,
    Punct,
    Space,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    kind: TokenKind,
    text: String,
}

impl Token {
    fn new(kind: TokenKind, text: &str) -> Self {
        Token {
            kind,
            text: text.to_owned(),
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Space | TokenKind::Comment)
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == 1 && self.text.starts_with(c)
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Ident && self.text.eq_ignore_ascii_case(keyword)
    }

    /// The identifier this token names, with quoting removed.
    pub fn ident_value(&self) -> Option<String> {
        match self.kind {
            TokenKind::Ident => Some(self.text.clone()),
            TokenKind::QuotedIdent => {
                let inner = &self.text[1..self.text.len() - 1];
                Some(match self.text.chars().next() {
                    Some('"') => inner.replace("\"\"", "\""),
                    Some('`') => inner.replace("``", "`"),
                    _ => inner.to_owned(),
                })
            }
            _ => None,
        }
    }

    /// SQLite identifiers compare case-insensitively.
    pub fn names(&self, ident: &str) -> bool {
        self.ident_value()
            .is_some_and(|value| value.eq_ignore_ascii_case(ident))
    }

    /// Replaces the identifier, keeping a bare identifier bare when the new name allows it.
    pub fn rename(&mut self, new_name: &str) {
        if self.kind == TokenKind::Ident && is_bare_identifier(new_name) {
            self.text = new_name.to_owned();
        } else {
            self.kind = TokenKind::QuotedIdent;
            self.text = format!("\"{}\"", new_name.replace('"', "\"\""));
        }
    }
}

fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

pub fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let end_of = |idx: usize| chars.get(idx).map(|(pos, _)| *pos).unwrap_or(sql.len());

    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (start, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let (kind, consumed) = if c.is_whitespace() {
            let n = chars[i..].iter().take_while(|(_, c)| c.is_whitespace()).count();
            (TokenKind::Space, n)
        } else if c == '-' && next == Some('-') {
            let n = chars[i..].iter().take_while(|(_, c)| *c != '\n').count();
            (TokenKind::Comment, n)
        } else if c == '/' && next == Some('*') {
            let mut j = i + 2;
            while j < chars.len() && !(chars[j].1 == '*' && chars.get(j + 1).map(|(_, c)| *c) == Some('/')) {
                j += 1;
            }
            (TokenKind::Comment, (j + 2).min(chars.len()) - i)
        } else if c == '\'' {
            (TokenKind::Str, quoted_len(&chars[i..], '\''))
        } else if c == '"' {
            (TokenKind::QuotedIdent, quoted_len(&chars[i..], '"'))
        } else if c == '`' {
            (TokenKind::QuotedIdent, quoted_len(&chars[i..], '`'))
        } else if c == '[' {
            let n = chars[i..].iter().position(|(_, c)| *c == ']').map(|p| p + 1);
            (TokenKind::QuotedIdent, n.unwrap_or(chars.len() - i))
        } else if c.is_ascii_digit() {
            let n = chars[i..]
                .iter()
                .take_while(|(_, c)| c.is_alphanumeric() || *c == '.')
                .count();
            (TokenKind::Number, n)
        } else if c.is_alphabetic() || c == '_' {
            let n = chars[i..]
                .iter()
                .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '$')
                .count();
            (TokenKind::Ident, n)
        } else {
            (TokenKind::Punct, 1)
        };

        tokens.push(Token::new(kind, &sql[start..end_of(i + consumed)]));
        i += consumed;
    }

    tokens
}

/// Length of a quoted run starting at `chars[0]`, honouring doubled-quote escapes.
/// An unterminated run extends to the end of input.
fn quoted_len(chars: &[(usize, char)], quote: char) -> usize {
    let mut j = 1;
    while j < chars.len() {
        if chars[j].1 == quote {
            if chars.get(j + 1).map(|(_, c)| *c) == Some(quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    chars.len()
}

pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(Token::text).collect()
}
