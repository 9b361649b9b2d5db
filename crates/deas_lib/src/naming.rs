use std::collections::BTreeMap;

use bimap::BiMap;

/// Register number to variable name, unique in both directions.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    names: BiMap<u8, String>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names for a function body: the parent's names when inheriting, then
    /// the function's own register hints on top.
    pub fn for_function(hints: &BTreeMap<u8, String>, parent: Option<&NameTable>) -> Self {
        let mut table = parent.cloned().unwrap_or_default();
        for (register, hint) in hints {
            table.names.remove_by_left(register);
            table.name_register(*register, hint);
        }
        table
    }

    /// Binds `register` to a name derived from `hint`, or returns the name it
    /// already has.
    pub fn name_register(&mut self, register: u8, hint: &str) -> String {
        if let Some(name) = self.names.get_by_left(&register) {
            return name.clone();
        }
        let mut name = sanitize_ident(hint);
        while self.names.contains_right(&name) {
            name = incremented_name(&name);
        }
        log::trace!("register {register} named {name}");
        self.names.insert(register, name.clone());
        name
    }

    pub fn register_name(&mut self, register: u8) -> String {
        self.name_register(register, &format!("reg{register}"))
    }

    pub fn register_of(&self, name: &str) -> Option<u8> {
        self.names.get_by_right(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// `x` becomes `x_1`, `x_1` becomes `x_2`.
pub fn incremented_name(name: &str) -> String {
    if let Some((stem, suffix)) = name.rsplit_once('_') {
        if let Ok(n) = suffix.parse::<u32>() {
            return format!("{stem}_{}", n + 1);
        }
    }
    format!("{name}_1")
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(ch) if ch == '_' || ch == '$' || ch.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch == '$' || ch.is_ascii_alphanumeric())
}

pub fn sanitize_ident(s: &str) -> String {
    if s.is_empty() {
        return "_".into();
    }
    let mut out = String::with_capacity(s.len());
    for (i, ch) in s.chars().enumerate() {
        let ok = if i == 0 {
            ch == '_' || ch == '$' || ch.is_ascii_alphabetic()
        } else {
            ch == '_' || ch == '$' || ch.is_ascii_alphanumeric()
        };
        out.push(if ok { ch } else { '_' });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremented_name() {
        assert_eq!(incremented_name("x"), "x_1");
        assert_eq!(incremented_name("x_1"), "x_2");
        assert_eq!(incremented_name("x_9"), "x_10");
        assert_eq!(incremented_name("my_var"), "my_var_1");
    }

    #[test]
    fn test_sanitize_ident() {
        assert_eq!(sanitize_ident(""), "_");
        assert_eq!(sanitize_ident("1st"), "_st");
        assert_eq!(sanitize_ident("a-b c"), "a_b_c");
        assert_eq!(sanitize_ident("$ok_1"), "$ok_1");
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("_x1"));
        assert!(is_identifier("$"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a b"));
    }

    #[test]
    fn test_register_names_are_unique() {
        let mut names = NameTable::new();
        assert_eq!(names.name_register(1, "count"), "count");
        assert_eq!(names.name_register(2, "count"), "count_1");
        assert_eq!(names.name_register(3, "count"), "count_2");
        assert_eq!(names.name_register(1, "other"), "count");
        assert_eq!(names.register_of("count_1"), Some(2));
        assert_eq!(names.register_name(7), "reg7");
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_function_tables() {
        let mut parent = NameTable::new();
        parent.name_register(1, "outer");
        parent.name_register(2, "shared");

        let hints = BTreeMap::from([(2, "arg".to_string()), (3, "outer".to_string())]);
        let fresh = NameTable::for_function(&hints, None);
        assert_eq!(fresh.register_of("arg"), Some(2));
        assert_eq!(fresh.register_of("outer"), Some(3));

        let inherited = NameTable::for_function(&hints, Some(&parent));
        assert_eq!(inherited.register_of("arg"), Some(2));
        assert_eq!(inherited.register_of("outer"), Some(1));
        assert_eq!(inherited.register_of("outer_1"), Some(3));
        assert_eq!(inherited.register_of("shared"), None);
    }
}
