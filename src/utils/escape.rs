/// Escape text for inclusion in XML content or attribute values, per spec §4.7:
/// `& < > " '` become named entities; control characters outside
/// `\t \n \r` (U+0000..U+001F, U+007F..U+009F) are stripped before escaping.
pub fn escape_xml_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if is_stripped_control(ch) {
            continue;
        }
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn is_stripped_control(ch: char) -> bool {
    if matches!(ch, '\t' | '\n' | '\r') {
        return false;
    }
    let c = ch as u32;
    (0x00..=0x1F).contains(&c) || (0x7F..=0x9F).contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(
            escape_xml_text("<a> & \"b\" 'c'"),
            "&lt;a&gt; &amp; &quot;b&quot; &#x27;c&#x27;"
        );
    }

    #[test]
    fn keeps_tab_newline_cr() {
        assert_eq!(escape_xml_text("a\tb\nc\rd"), "a\tb\nc\rd");
    }

    #[test]
    fn strips_other_control_characters() {
        let input = "a\u{0001}b\u{007F}c";
        assert_eq!(escape_xml_text(input), "abc");
    }
}
