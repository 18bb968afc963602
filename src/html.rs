//! HTML element classification and doctype shorthands used at emission time.

/// Void elements: rendered without a closing tag.
/// https://html.spec.whatwg.org/multipage/syntax.html#void-elements
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link",
    "meta", "param", "portal", "source", "track", "wbr",
];

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

/// Canonical doctype line for a builtin shorthand name.
pub fn doctype_builtin(name: &str) -> Option<&'static str> {
    Some(match name {
        "html" => "<!DOCTYPE html>",
        "xml" => "<?xml version=\"1.0\" encoding=\"utf-8\" ?>",
        "transitional" => {
            "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Transitional//EN\" \
             \"http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd\">"
        }
        "strict" => {
            "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Strict//EN\" \
             \"http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd\">"
        }
        "frameset" => {
            "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Frameset//EN\" \
             \"http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd\">"
        }
        "1.1" => {
            "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\" \
             \"http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd\">"
        }
        "basic" => {
            "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML Basic 1.1//EN\" \
             \"http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd\">"
        }
        "mobile" => {
            "<!DOCTYPE html PUBLIC \"-//WAPFORUM//DTD XHTML Mobile 1.2//EN\" \
             \"http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd\">"
        }
        "plist" => {
            "<!DOCTYPE plist PUBLIC \"-//Apple Computer//DTD PLIST 1.0//EN\" \
             \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">"
        }
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_tags_have_no_closing_tag() {
        assert!(is_void_tag("br"));
        assert!(is_void_tag("img"));
        assert!(is_void_tag("wbr"));
        assert!(!is_void_tag("div"));
        assert!(!is_void_tag("span"));
    }

    #[test]
    fn doctype_shorthands_resolve() {
        assert_eq!(doctype_builtin("html"), Some("<!DOCTYPE html>"));
        assert!(doctype_builtin("xml").unwrap().starts_with("<?xml"));
        assert_eq!(doctype_builtin("html5"), None);
    }
}
