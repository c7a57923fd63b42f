/// All lexemes in the Opal language.
#[derive(Clone, Debug, PartialEq)]
pub enum Lexeme {
    // Keywords
    Use,
    Bundle,
    Class,
    Interface,
    Implements,
    From,
    Enum,
    Method,
    Function,
    New,
    Public,
    Private,
    Static,
    Virtual,
    Native,
    If,
    Else,
    Do,
    While,
    For,
    Each,
    Break,
    Select,
    Label,
    Other,
    Return,
    Critical,
    True,
    False,
    As,
    TypeOf,
    Parent,

    // Type keywords
    NilTy,
    BoolTy,
    ByteTy,
    CharTy,
    IntTy,
    FloatTy,

    // Bitwise keywords
    AndId, // and
    OrId,  // or
    XorId, // xor

    // Symbols
    Assign,    // :=
    AddAssign, // +=
    SubAssign, // -=
    MulAssign, // *=
    DivAssign, // /=
    Eql,       // =
    Neql,      // <>
    Les,       // <
    Gtr,       // >
    LesEql,    // <=
    GtrEql,    // >=
    Add,       // +
    Sub,       // -
    Mul,       // *
    Div,       // /
    Mod,       // %
    Shl,       // <<
    Shr,       // >>
    And,       // &
    Or,        // |
    Question,  // ?
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Comma,     // ,
    Semicolon, // ;
    Colon,     // :
    Dot,       // .
    Tilde,     // ~
    Assessor,  // ->

    // Literals
    Ident(String),
    IntLit(i32),
    ByteLit(u8),
    FloatLit(f64),
    CharLit(char),
    StringLit(String),

    Eof,
}

impl Lexeme {
    pub fn from_keyword(text: &str) -> Option<Lexeme> {
        let token = match text {
            "use" => Lexeme::Use,
            "bundle" => Lexeme::Bundle,
            "class" => Lexeme::Class,
            "interface" => Lexeme::Interface,
            "implements" => Lexeme::Implements,
            "from" => Lexeme::From,
            "enum" => Lexeme::Enum,
            "method" => Lexeme::Method,
            "function" => Lexeme::Function,
            "New" => Lexeme::New,
            "public" => Lexeme::Public,
            "private" => Lexeme::Private,
            "static" => Lexeme::Static,
            "virtual" => Lexeme::Virtual,
            "native" => Lexeme::Native,
            "if" => Lexeme::If,
            "else" => Lexeme::Else,
            "do" => Lexeme::Do,
            "while" => Lexeme::While,
            "for" => Lexeme::For,
            "each" => Lexeme::Each,
            "break" => Lexeme::Break,
            "select" => Lexeme::Select,
            "label" => Lexeme::Label,
            "other" => Lexeme::Other,
            "return" => Lexeme::Return,
            "critical" => Lexeme::Critical,
            "true" => Lexeme::True,
            "false" => Lexeme::False,
            "and" => Lexeme::AndId,
            "or" => Lexeme::OrId,
            "xor" => Lexeme::XorId,
            "As" => Lexeme::As,
            "TypeOf" => Lexeme::TypeOf,
            "Parent" => Lexeme::Parent,
            "Nil" => Lexeme::NilTy,
            "Bool" => Lexeme::BoolTy,
            "Byte" => Lexeme::ByteTy,
            "Char" => Lexeme::CharTy,
            "Int" => Lexeme::IntTy,
            "Float" => Lexeme::FloatTy,
            _ => return None,
        };
        Some(token)
    }

    /// A short name for error messages.
    pub fn describe(&self) -> String {
        match self {
            Lexeme::Ident(name) => format!("identifier '{}'", name),
            Lexeme::IntLit(v) => format!("integer literal '{}'", v),
            Lexeme::ByteLit(v) => format!("byte literal '{}'", v),
            Lexeme::FloatLit(v) => format!("float literal '{}'", v),
            Lexeme::CharLit(c) => format!("character literal '{}'", c),
            Lexeme::StringLit(_) => "string literal".to_string(),
            Lexeme::Eof => "end of file".to_string(),
            Lexeme::Assign => "':='".to_string(),
            Lexeme::Assessor => "'->'".to_string(),
            Lexeme::Semicolon => "';'".to_string(),
            Lexeme::Colon => "':'".to_string(),
            Lexeme::Tilde => "'~'".to_string(),
            Lexeme::LBrace => "'{'".to_string(),
            Lexeme::RBrace => "'}'".to_string(),
            Lexeme::LParen => "'('".to_string(),
            Lexeme::RParen => "')'".to_string(),
            Lexeme::LBracket => "'['".to_string(),
            Lexeme::RBracket => "']'".to_string(),
            other => format!("{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_resolve() {
        assert_eq!(Lexeme::from_keyword("class"), Some(Lexeme::Class));
        assert_eq!(Lexeme::from_keyword("New"), Some(Lexeme::New));
        assert_eq!(Lexeme::from_keyword("TypeOf"), Some(Lexeme::TypeOf));
        assert_eq!(Lexeme::from_keyword("Nil"), Some(Lexeme::NilTy));
        assert_eq!(Lexeme::from_keyword("frobnicate"), None);
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert_eq!(Lexeme::from_keyword("Class"), None);
        assert_eq!(Lexeme::from_keyword("new"), None);
    }
}
