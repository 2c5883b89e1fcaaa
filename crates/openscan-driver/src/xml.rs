//! Namespace-agnostic XML extraction for device responses.
//!
//! Scanner firmware is inconsistent about namespace prefixes (`pwg:`, `scan:`,
//! `wscn:`, none at all), so elements are matched on their local name only.
//! Comments, processing instructions and doctypes are skipped, CDATA sections
//! count as text, and a `>` inside a quoted attribute value does not end its
//! tag. DTD internal subsets are not supported.

/// Byte range of an element's inner content.
#[derive(Debug, Clone, Copy)]
struct Span {
    inner_start: usize,
    inner_end: usize,
    end: usize,
}

/// What a piece of markup is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind<'a> {
    /// Start tag, by local name
    Open { name: &'a str, self_closing: bool },
    /// End tag, by local name
    Close(&'a str),
    /// `<![CDATA[...]]>` with its raw content
    Cdata(&'a str),
    /// Comment, processing instruction or doctype
    Skip,
}

/// One piece of markup: `xml[start..end]` runs from `<` to just past `>`.
#[derive(Debug, Clone, Copy)]
struct Markup<'a> {
    start: usize,
    end: usize,
    kind: Kind<'a>,
}

/// Local part of a qualified tag name.
fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Offset of the `>` that ends the tag at the start of `tag`, skipping
/// quoted attribute values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in tag.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Some(i),
            None => {}
        }
    }
    None
}

/// Next piece of markup at or after `from`; `None` at the end or on
/// unterminated markup.
fn next_markup(xml: &str, from: usize) -> Option<Markup<'_>> {
    let start = from + xml.get(from..)?.find('<')?;
    let rest = &xml[start..];

    for (open, close) in [("<!--", "-->"), ("<![CDATA[", "]]>"), ("<?", "?>")] {
        if let Some(body) = rest.strip_prefix(open) {
            let len = body.find(close)?;
            let kind = if open == "<![CDATA[" {
                Kind::Cdata(&body[..len])
            } else {
                Kind::Skip
            };
            return Some(Markup {
                start,
                end: start + open.len() + len + close.len(),
                kind,
            });
        }
    }

    let gt = start + tag_end(rest)?;
    let head = &xml[start + 1..gt];
    let kind = if let Some(closing) = head.strip_prefix('/') {
        Kind::Close(local_name(closing.trim()))
    } else if head.starts_with('!') {
        Kind::Skip
    } else {
        let name_end = head
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(head.len());
        Kind::Open {
            name: local_name(&head[..name_end]),
            self_closing: head.ends_with('/'),
        }
    };
    Some(Markup {
        start,
        end: gt + 1,
        kind,
    })
}

/// Locate the element named `local` whose start tag is the first at or after `from`.
fn find_element(xml: &str, local: &str, from: usize) -> Option<Span> {
    let mut cursor = from;
    loop {
        let markup = next_markup(xml, cursor)?;
        cursor = markup.end;
        let Kind::Open { name, self_closing } = markup.kind else {
            continue;
        };
        if name != local {
            continue;
        }
        if self_closing {
            return Some(Span {
                inner_start: markup.end,
                inner_end: markup.end,
                end: markup.end,
            });
        }
        return find_close(xml, local, markup.end).map(|(inner_end, end)| Span {
            inner_start: markup.end,
            inner_end,
            end,
        });
    }
}

/// Matching close tag for an element whose content starts at `from`.
fn find_close(xml: &str, local: &str, from: usize) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    let mut cursor = from;
    loop {
        let markup = next_markup(xml, cursor)?;
        cursor = markup.end;
        match markup.kind {
            Kind::Close(name) if name == local => {
                depth -= 1;
                if depth == 0 {
                    return Some((markup.start, markup.end));
                }
            }
            Kind::Open {
                name,
                self_closing: false,
            } if name == local => depth += 1,
            _ => {}
        }
    }
}

/// Character data of `inner`: entities decoded, CDATA kept verbatim,
/// comments and child tags dropped.
fn text_content(inner: &str) -> String {
    let mut text = String::new();
    let mut cursor = 0;
    while let Some(markup) = next_markup(inner, cursor) {
        text.push_str(&unescape(&inner[cursor..markup.start]));
        if let Kind::Cdata(data) = markup.kind {
            text.push_str(data);
        }
        cursor = markup.end;
    }
    text.push_str(&unescape(&inner[cursor..]));
    text
}

/// Inner markup of the first element named `local`.
#[must_use]
pub fn element_block<'a>(xml: &'a str, local: &str) -> Option<&'a str> {
    find_element(xml, local, 0).map(|s| &xml[s.inner_start..s.inner_end])
}

/// Inner markup of every element named `local`, in document order.
#[must_use]
pub fn element_blocks<'a>(xml: &'a str, local: &str) -> Vec<&'a str> {
    let mut blocks = Vec::new();
    let mut cursor = 0;
    while let Some(span) = find_element(xml, local, cursor) {
        blocks.push(&xml[span.inner_start..span.inner_end]);
        cursor = span.end;
    }
    blocks
}

/// Trimmed, unescaped text of the first element named `local`.
#[must_use]
pub fn element_text(xml: &str, local: &str) -> Option<String> {
    element_block(xml, local).map(|inner| text_content(inner).trim().to_string())
}

/// Trimmed, unescaped text of every element named `local`.
#[must_use]
pub fn element_texts(xml: &str, local: &str) -> Vec<String> {
    element_blocks(xml, local)
        .into_iter()
        .map(|inner| text_content(inner).trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

/// Whether an element named `local` is present.
#[must_use]
pub fn has_element(xml: &str, local: &str) -> bool {
    find_element(xml, local, 0).is_some()
}

/// Decode the five predefined XML entities.
#[must_use]
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Escape text for use in element content or attribute values.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scan:ScannerStatus xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:Version>2.63</pwg:Version>
  <pwg:State>Idle</pwg:State>
  <scan:AdfState>ScannerAdfLoaded</scan:AdfState>
  <scan:Jobs>
    <scan:JobInfo><pwg:JobUri>/eSCL/ScanJobs/1</pwg:JobUri><pwg:JobState>Completed</pwg:JobState></scan:JobInfo>
    <scan:JobInfo><pwg:JobUri>/eSCL/ScanJobs/2</pwg:JobUri><pwg:JobState>Processing</pwg:JobState></scan:JobInfo>
  </scan:Jobs>
</scan:ScannerStatus>"#;

    #[test]
    fn test_prefix_agnostic_text() {
        assert_eq!(element_text(STATUS, "State").as_deref(), Some("Idle"));
        assert_eq!(
            element_text(STATUS, "AdfState").as_deref(),
            Some("ScannerAdfLoaded")
        );
        assert!(element_text(STATUS, "Missing").is_none());
    }

    #[test]
    fn test_blocks_in_order() {
        let jobs = element_blocks(STATUS, "JobInfo");
        assert_eq!(jobs.len(), 2);
        assert_eq!(element_text(jobs[1], "JobState").as_deref(), Some("Processing"));
    }

    #[test]
    fn test_state_does_not_match_adf_state() {
        let xml = "<a:AdfState>Empty</a:AdfState><b:State>Idle</b:State>";
        assert_eq!(element_text(xml, "State").as_deref(), Some("Idle"));
    }

    #[test]
    fn test_nested_same_name() {
        let xml = "<Item><Item>inner</Item></Item><Item>second</Item>";
        let blocks = element_blocks(xml, "Item");
        assert_eq!(blocks, vec!["<Item>inner</Item>", "second"]);
    }

    #[test]
    fn test_self_closing_and_attributes() {
        let xml = r#"<root><scan:Platen/><scan:Adf kind="x">y</scan:Adf></root>"#;
        assert!(has_element(xml, "Platen"));
        assert_eq!(element_text(xml, "Adf").as_deref(), Some("y"));
    }

    #[test]
    fn test_escape_unescape() {
        let raw = r#"Tom & "Jerry" <scan>"#;
        assert_eq!(unescape(&escape(raw)), raw);
        assert_eq!(element_text("<n>A &amp; B</n>", "n").as_deref(), Some("A & B"));
    }

    #[test]
    fn test_comments_are_not_elements() {
        let xml = "<r><!-- <State>Stopped</State> --><State>Idle</State></r>";
        assert_eq!(element_text(xml, "State").as_deref(), Some("Idle"));
        assert_eq!(element_blocks(xml, "State").len(), 1);

        let xml = "<r><State>Idle<!-- was Processing --></State></r>";
        assert_eq!(element_text(xml, "State").as_deref(), Some("Idle"));
    }

    #[test]
    fn test_cdata_is_text() {
        let xml = "<r><Name><![CDATA[Copy & Scan <Pro>]]></Name></r>";
        assert_eq!(element_text(xml, "Name").as_deref(), Some("Copy & Scan <Pro>"));

        // Markup-looking CDATA does not open an element
        let xml = "<r><Note><![CDATA[<Adf>]]></Note></r>";
        assert!(!has_element(xml, "Adf"));
    }

    #[test]
    fn test_gt_inside_attribute_value() {
        let xml = r#"<r><Data Name="a>b" Valid='x>y'><Value>42</Value></Data></r>"#;
        assert_eq!(element_text(xml, "Value").as_deref(), Some("42"));
        let block = element_block(xml, "Data").unwrap();
        assert_eq!(block, "<Value>42</Value>");
    }

    #[test]
    fn test_doctype_and_declaration_skipped() {
        let xml = "<?xml version=\"1.0\"?><!DOCTYPE r><r><v>1</v></r>";
        assert_eq!(element_text(xml, "v").as_deref(), Some("1"));
    }

    #[test]
    fn test_unterminated_comment_finds_nothing_after_it() {
        let xml = "<r><!-- <v>1</v></r>";
        assert!(!has_element(xml, "v"));
    }

    #[test]
    fn test_texts_skip_empty() {
        let xml = "<r><v>1</v><v> </v><v>3</v></r>";
        assert_eq!(element_texts(xml, "v"), vec!["1", "3"]);
    }
}
