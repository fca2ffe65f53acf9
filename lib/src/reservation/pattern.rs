use regex::Regex;

/// Product type pattern using SQL `LIKE` wildcards: `_` matches exactly one character, `%` any
/// run of characters. Matching is case-sensitive, like product type names.
pub(super) struct TypePattern {
    regex: Regex,
}

impl TypePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut source = String::from("(?s)^");
        let mut literal = String::new();

        for c in pattern.chars() {
            let group = match c {
                '_' => "(.)",
                '%' => "(.*)",
                _ => {
                    literal.push(c);
                    continue;
                }
            };

            source.push_str(&regex::escape(&literal));
            source.push_str(group);
            literal.clear();
        }

        source.push_str(&regex::escape(&literal));
        source.push('$');

        Ok(Self {
            regex: Regex::new(&source)?,
        })
    }

    /// If `name` matches, the fragments matched by each wildcard, in order.
    pub fn captures(&self, name: &str) -> Option<Vec<String>> {
        let captures = self.regex.captures(name)?;

        Some(
            captures
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_owned()).unwrap_or_default())
                .collect(),
        )
    }
}

/// Fills the wildcards of `pattern` with `captures`, in order. Wildcards left over once the
/// captures run out are kept as they are.
pub(super) fn substitute(pattern: &str, captures: &[String]) -> String {
    let mut captures = captures.iter();
    let mut output = String::with_capacity(pattern.len());

    for c in pattern.chars() {
        if c == '_' || c == '%' {
            if let Some(capture) = captures.next() {
                output.push_str(capture);
                continue;
            }
        }

        output.push(c);
    }

    output
}
