//! Semantic types and the signature-mangling scheme used for method keys.
//!
//! Per-parameter encoding: `l` Bool, `b` Byte, `c` Char, `i` Int, `f` Float,
//! `n` Nil, `o.<FullClassName>` class, `m.(<params>)~<return>` function.
//! Arrays append one `*` per dimension; parameters terminate with `,`.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Inference placeholder, narrowed exactly once at first assignment.
    Var,
    Nil,
    Bool,
    Byte,
    Char,
    Int,
    Float,
    Class,
    Func,
}

/// A tagged type record. Every type carries a dimension (0 = scalar).
///
/// `Class` types name their class in `class_name`. `Func` types cache their
/// structural encoding (`m.(<params>)~<return>`) in `class_name` once it has
/// been computed; the encoded string is the type's identity.
#[derive(Clone, Debug)]
pub struct Type {
    pub kind: TypeKind,
    pub dimension: u32,
    pub class_name: String,
    pub func_params: Vec<Type>,
    pub func_return: Option<Box<Type>>,
    pub func_param_count: i32,
}

impl Default for Type {
    fn default() -> Self {
        Type::basic(TypeKind::Nil)
    }
}

impl Type {
    pub fn basic(kind: TypeKind) -> Self {
        Self {
            kind,
            dimension: 0,
            class_name: String::new(),
            func_params: Vec::new(),
            func_return: None,
            func_param_count: -1,
        }
    }

    pub fn class(name: impl Into<String>) -> Self {
        let mut ty = Self::basic(TypeKind::Class);
        ty.class_name = name.into();
        ty
    }

    pub fn func(params: Vec<Type>, rtrn: Type) -> Self {
        let mut ty = Self::basic(TypeKind::Func);
        ty.func_params = params;
        ty.func_return = Some(Box::new(rtrn));
        ty
    }

    pub fn with_dimension(mut self, dimension: u32) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn is_scalar(&self) -> bool {
        self.dimension == 0
    }

    /// Display name used in diagnostics.
    pub fn display(&self) -> String {
        let base = match self.kind {
            TypeKind::Var => "Var".to_string(),
            TypeKind::Nil => "Nil".to_string(),
            TypeKind::Bool => "Bool".to_string(),
            TypeKind::Byte => "Byte".to_string(),
            TypeKind::Char => "Char".to_string(),
            TypeKind::Int => "Int".to_string(),
            TypeKind::Float => "Float".to_string(),
            TypeKind::Class => self.class_name.clone(),
            TypeKind::Func => "function reference".to_string(),
        };
        if self.dimension > 0 {
            format!("{}{}", base, "[]".repeat(self.dimension as usize))
        } else {
            base
        }
    }

    /// Single-type encoding with dimension markers, no terminator.
    pub fn encode(&self) -> String {
        let mut out = match self.kind {
            TypeKind::Bool => "l".to_string(),
            TypeKind::Byte => "b".to_string(),
            TypeKind::Char => "c".to_string(),
            TypeKind::Int => "i".to_string(),
            TypeKind::Float => "f".to_string(),
            TypeKind::Nil | TypeKind::Var => "n".to_string(),
            TypeKind::Class => format!("o.{}", self.class_name),
            TypeKind::Func => {
                if self.class_name.is_empty() {
                    let rtrn = self
                        .func_return
                        .as_deref()
                        .cloned()
                        .unwrap_or_else(|| Type::basic(TypeKind::Nil));
                    format!("m.{}", encode_function_type(&self.func_params, &rtrn))
                } else {
                    self.class_name.clone()
                }
            }
        };
        for _ in 0..self.dimension {
            out.push('*');
        }
        out
    }
}

/// Structural function-type identity: `(<params>)~<return>`.
pub fn encode_function_type(params: &[Type], rtrn: &Type) -> String {
    let mut encoded = String::from("(");
    for param in params {
        encoded.push_str(&param.encode());
        encoded.push(',');
    }
    encoded.push_str(")~");
    encoded.push_str(&rtrn.encode());
    encoded
}

/// Encodes a parameter list the way method keys store it: each parameter's
/// encoding followed by `,`.
pub fn encode_parameter_list(params: &[Type]) -> String {
    let mut encoded = String::new();
    for param in params {
        encoded.push_str(&param.encode());
        encoded.push(',');
    }
    encoded
}

/// Re-parses the `<param-encoding>` tail of a mangled method name into types.
/// Function-typed parameters keep their raw encoding as their string identity.
pub fn decode_parameter_list(encoding: &str) -> Vec<Type> {
    let chars: Vec<char> = encoding.chars().collect();
    let mut types = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let mut ty = match chars[index] {
            'l' => {
                index += 1;
                Type::basic(TypeKind::Bool)
            }
            'b' => {
                index += 1;
                Type::basic(TypeKind::Byte)
            }
            'c' => {
                index += 1;
                Type::basic(TypeKind::Char)
            }
            'i' => {
                index += 1;
                Type::basic(TypeKind::Int)
            }
            'f' => {
                index += 1;
                Type::basic(TypeKind::Float)
            }
            'n' => {
                index += 1;
                Type::basic(TypeKind::Nil)
            }
            'o' => {
                // o.<FullClassName>
                index += 2;
                let start = index;
                while index < chars.len() && chars[index] != '*' && chars[index] != ',' {
                    index += 1;
                }
                let name: String = chars[start..index].iter().collect();
                Type::class(name)
            }
            'm' => {
                // m.(<params>)~<return> kept as an opaque identity string
                let start = index;
                let mut depth = 0i32;
                while index < chars.len() {
                    match chars[index] {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        '~' if depth == 0 => break,
                        _ => {}
                    }
                    index += 1;
                }
                index += 1; // '~'
                while index < chars.len() && chars[index] != '*' && chars[index] != ',' {
                    index += 1;
                }
                let name: String = chars[start..index].iter().collect();
                let mut ty = Type::basic(TypeKind::Func);
                ty.class_name = name;
                ty
            }
            _ => {
                index += 1;
                Type::basic(TypeKind::Nil)
            }
        };

        let mut dimension = 0;
        while index < chars.len() && chars[index] == '*' {
            dimension += 1;
            index += 1;
        }
        ty.dimension = dimension;
        types.push(ty);

        // parameter terminator
        if index < chars.len() && chars[index] == ',' {
            index += 1;
        }
    }

    types
}

/// Re-parses a stored return-type encoding.
pub fn decode_return(encoding: &str) -> Type {
    let mut decoded = decode_parameter_list(encoding);
    if decoded.is_empty() {
        Type::basic(TypeKind::Nil)
    } else {
        decoded.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_encodings() {
        assert_eq!(Type::basic(TypeKind::Bool).encode(), "l");
        assert_eq!(Type::basic(TypeKind::Byte).encode(), "b");
        assert_eq!(Type::basic(TypeKind::Char).encode(), "c");
        assert_eq!(Type::basic(TypeKind::Int).encode(), "i");
        assert_eq!(Type::basic(TypeKind::Float).encode(), "f");
        assert_eq!(Type::basic(TypeKind::Nil).encode(), "n");
    }

    #[test]
    fn test_class_and_array_encodings() {
        assert_eq!(Type::class("System.String").encode(), "o.System.String");
        assert_eq!(
            Type::class("System.String").with_dimension(1).encode(),
            "o.System.String*"
        );
        assert_eq!(Type::basic(TypeKind::Int).with_dimension(2).encode(), "i**");
    }

    #[test]
    fn test_function_encoding() {
        let func = Type::func(
            vec![Type::basic(TypeKind::Int), Type::basic(TypeKind::Float)],
            Type::basic(TypeKind::Int),
        );
        assert_eq!(func.encode(), "m.(i,f,)~i");
    }

    #[test]
    fn test_parameter_list_round_trip() {
        for encoding in [
            "i,",
            "o.System.String*,",
            "l,b,c,i,f,n,",
            "i**,o.A.B,f,",
            "m.(i,)~o.System.String,i,",
        ] {
            let decoded = decode_parameter_list(encoding);
            assert_eq!(encode_parameter_list(&decoded), encoding, "{}", encoding);
        }
    }

    #[test]
    fn test_decode_return_scalar_and_array() {
        let rtrn = decode_return("o.System.String*");
        assert_eq!(rtrn.kind, TypeKind::Class);
        assert_eq!(rtrn.class_name, "System.String");
        assert_eq!(rtrn.dimension, 1);

        let rtrn = decode_return("i");
        assert_eq!(rtrn.kind, TypeKind::Int);
        assert_eq!(rtrn.dimension, 0);
    }

    #[test]
    fn test_decode_function_parameter_keeps_identity() {
        let decoded = decode_parameter_list("m.(i,f,)~l,");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].kind, TypeKind::Func);
        assert_eq!(decoded[0].class_name, "m.(i,f,)~l");
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Type::basic(TypeKind::Int).display(), "Int");
        assert_eq!(
            Type::class("Shape").with_dimension(2).display(),
            "Shape[][]"
        );
    }
}
