/// A parsed search box input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query<'a> {
    /// Empty input: every image.
    ListAll,
    /// `#name`: images carrying exactly that tag. The name is still localized.
    Tag(&'a str),
    /// Anything else: tag match or text substring.
    Combined(&'a str),
}

impl<'a> Query<'a> {
    pub fn parse(input: &'a str) -> Self {
        if input.is_empty() {
            Query::ListAll
        } else if let Some(tag) = input.strip_prefix('#') {
            Query::Tag(tag)
        } else {
            Query::Combined(input)
        }
    }
}
