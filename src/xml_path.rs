use std::fmt;
use string_cache::DefaultAtom as Atom;

/// Element names from the document root down to the element being built.
///
/// The serializer pushes a name when it enters an element and pops it on the
/// way out; the path is shown in serialization errors and its length is the
/// current nesting depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlPath {
    parts: Vec<Atom>,
}

impl XmlPath {
    pub fn push(&mut self, name: &str) {
        self.parts.push(Atom::from(name));
    }

    pub fn pop(&mut self) -> Option<Atom> {
        self.parts.pop()
    }

    /// Number of elements on the path; the root element counts as 1.
    pub fn depth(&self) -> usize {
        self.parts.len()
    }
}

impl fmt::Display for XmlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return f.write_str("/");
        }
        for part in &self.parts {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}
