use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub key: Option<String>,
    pub value: String,
}

impl Parameter {
    pub fn named(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
        }
    }

    pub fn positional(value: impl Into<String>) -> Self {
        Self {
            key: None,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `{{Title\n|key=value\n}}`
    MultiLine,
    /// `{{Title|key=value}}`
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateHandler {
    title: String,
    parameters: Vec<Parameter>,
}

impl TemplateHandler {
    pub fn new(title: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            title: title.into(),
            parameters,
        }
    }

    pub fn from_text(raw: &str) -> Result<Self, TemplateError> {
        let (title, parameters) = parse(raw)?;
        Ok(Self { title, parameters })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Value of the first parameter whose key matches exactly.
    pub fn get_parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|parameter| parameter.key.as_deref() == Some(key))
            .map(|parameter| parameter.value.as_str())
    }

    /// Value of the `index`-th positional parameter (zero based).
    pub fn positional(&self, index: usize) -> Option<&str> {
        self.parameters
            .iter()
            .filter(|parameter| parameter.key.is_none())
            .nth(index)
            .map(|parameter| parameter.value.as_str())
    }

    pub fn update_parameters(&mut self, parameters: Vec<Parameter>) {
        self.parameters = parameters;
    }

    pub fn to_text(&self, layout: Layout) -> String {
        serialize(&self.title, &self.parameters, layout)
    }
}

/// Split a raw `{{Title|a=b|c}}` invocation into its title and parameters.
pub fn parse(raw: &str) -> Result<(String, Vec<Parameter>), TemplateError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with("{{") || !trimmed.ends_with("}}") || trimmed.len() < 4 {
        return Err(TemplateError::NotATemplate(trimmed.to_string()));
    }
    let inner = &trimmed[2..trimmed.len() - 2];
    let segments = split_top_level(inner, '|').ok_or_else(|| TemplateError::Unbalanced {
        name: inner.split('|').next().unwrap_or("").trim().to_string(),
        start: 0,
    })?;

    let mut segments = segments.into_iter();
    let title = segments.next().unwrap_or_default().trim().to_string();
    let parameters = segments
        .map(|segment| match split_top_level_once(segment, '=') {
            Some((key, value)) => Parameter::named(key.trim(), value.trim()),
            None => Parameter::positional(segment.trim()),
        })
        .collect();
    Ok((title, parameters))
}

pub fn serialize(title: &str, parameters: &[Parameter], layout: Layout) -> String {
    let mut output = format!("{{{{{title}");
    for parameter in parameters {
        if layout == Layout::MultiLine {
            output.push('\n');
        }
        output.push('|');
        if let Some(key) = &parameter.key {
            output.push_str(key);
            output.push('=');
        }
        output.push_str(&parameter.value);
    }
    if layout == Layout::MultiLine {
        output.push('\n');
    }
    output.push_str("}}");
    output
}

/// Split on `delimiter` outside of `{{...}}` and `[[...]]`. `None` when the
/// nesting never closes.
fn split_top_level(text: &str, delimiter: char) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut segment_start = 0usize;
    let bytes = text.as_bytes();
    let mut index = 0usize;

    while index < bytes.len() {
        let pair = bytes.get(index..index + 2);
        match pair {
            Some(b"{{") | Some(b"[[") => {
                depth += 1;
                index += 2;
                continue;
            }
            Some(b"}}") | Some(b"]]") => {
                depth = depth.checked_sub(1)?;
                index += 2;
                continue;
            }
            _ => {}
        }
        if depth == 0 && bytes[index] == delimiter as u8 {
            segments.push(&text[segment_start..index]);
            segment_start = index + 1;
        }
        index += 1;
    }

    if depth != 0 {
        return None;
    }
    segments.push(&text[segment_start..]);
    Some(segments)
}

fn split_top_level_once(text: &str, delimiter: char) -> Option<(&str, &str)> {
    let parts = split_top_level(text, delimiter)?;
    if parts.len() < 2 {
        return None;
    }
    let key = parts[0];
    Some((key, &text[key.len() + 1..]))
}

#[cfg(test)]
mod tests {
    use super::{Layout, Parameter, TemplateHandler, parse, serialize};
    use crate::error::TemplateError;

    #[test]
    fn parses_named_and_positional_parameters() {
        let (title, parameters) = parse("{{REAutor| Abel. |II,1}}").expect("parse");
        assert_eq!(title, "REAutor");
        assert_eq!(
            parameters,
            vec![Parameter::positional("Abel."), Parameter::positional("II,1")]
        );

        let (_, parameters) = parse("{{REDaten\n|BAND=I,1\n|VERWEIS=ON\n}}").expect("parse");
        assert_eq!(parameters[0], Parameter::named("BAND", "I,1"));
        assert_eq!(parameters[1], Parameter::named("VERWEIS", "ON"));
    }

    #[test]
    fn nested_pipes_and_equals_are_kept_in_values() {
        let (_, parameters) =
            parse("{{T|a=[[Link|label]]|b={{Inner|x=1}}|c=1=2}}").expect("parse");
        assert_eq!(parameters[0].value, "[[Link|label]]");
        assert_eq!(parameters[1].value, "{{Inner|x=1}}");
        assert_eq!(parameters[2], Parameter::named("c", "1=2"));
    }

    #[test]
    fn positional_value_may_contain_nested_equals() {
        let (_, parameters) = parse("{{T|{{Inner|x=1}}}}").expect("parse");
        assert_eq!(parameters, vec![Parameter::positional("{{Inner|x=1}}")]);
    }

    #[test]
    fn empty_template_has_no_parameters() {
        let (title, parameters) = parse("{{REAbschnitt}}").expect("parse");
        assert_eq!(title, "REAbschnitt");
        assert!(parameters.is_empty());
    }

    #[test]
    fn unbalanced_inner_braces_fail() {
        let error = parse("{{T|a={{x}}").expect_err("must fail");
        assert!(matches!(error, TemplateError::Unbalanced { .. }));
        assert!(matches!(
            parse("REDaten").expect_err("must fail"),
            TemplateError::NotATemplate(_)
        ));
    }

    #[test]
    fn serializes_both_layouts() {
        let parameters = vec![Parameter::named("BAND", "I,1"), Parameter::positional("x")];
        assert_eq!(
            serialize("REDaten", &parameters, Layout::MultiLine),
            "{{REDaten\n|BAND=I,1\n|x\n}}"
        );
        assert_eq!(
            serialize("REAutor", &parameters, Layout::Inline),
            "{{REAutor|BAND=I,1|x}}"
        );
    }

    #[test]
    fn handler_lookup_and_update() {
        let mut handler = TemplateHandler::from_text("{{REAutor|Abel.|II}}").expect("parse");
        assert_eq!(handler.positional(0), Some("Abel."));
        assert_eq!(handler.positional(1), Some("II"));
        assert_eq!(handler.get_parameter("BAND"), None);
        handler.update_parameters(vec![Parameter::named("BAND", "III")]);
        handler.set_title("Other");
        assert_eq!(handler.to_text(Layout::Inline), "{{Other|BAND=III}}");
    }
}
