//! XHTML template parsing into handlers.
//!
//! Plain markup is folded into text runs; prefixed tags become handlers.
//! `ui:` tags drive templating, `f:metadata` / `f:facet` place content on
//! the tree, every other prefixed tag is a component.

use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rustc_hash::FxHashMap;

use super::handler::{
    ComponentHandler, CompositionClient, CompositionHandler, DefineHandler, FacetHandler,
    FragmentHandler, Handler, IncludeHandler, InsertClient, InsertHandler, MetadataHandler,
    ParamHandler, TextHandler,
};
use crate::utils::html::unescape;
use crate::view::el::ValueExpr;
use crate::view::error::{ViewError, ViewResult};

/// Parser output before it becomes a compiled view.
#[derive(Debug, Default)]
pub(crate) struct ParsedTemplate {
    pub handlers: Vec<Handler>,
    pub doctype: Option<String>,
    pub xml_decl: Option<String>,
}

/// An open prefixed tag.
#[derive(Debug)]
struct OpenTag {
    prefix: String,
    local: String,
    attributes: Vec<(String, String)>,
    line: usize,
}

impl OpenTag {
    fn qname(&self) -> String {
        format!("{}:{}", self.prefix, self.local)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug)]
struct Frame {
    tag: Option<OpenTag>,
    body: Vec<Handler>,
    /// Pending literal markup, not yet a text handler.
    text: String,
}

impl Frame {
    fn new(tag: Option<OpenTag>) -> Self {
        Self {
            tag,
            body: Vec::new(),
            text: String::new(),
        }
    }
}

struct Parser<'s> {
    source: &'s str,
    alias: &'s str,
    trim_comments: bool,
    stack: Vec<Frame>,
    next_tag_id: usize,
    /// First `ui:composition`; everything outside it is dropped.
    composition: Option<Handler>,
    doctype: Option<String>,
    xml_decl: Option<String>,
}

/// Parse `source` (compiled under `alias`) into handlers.
pub(crate) fn parse(source: &str, alias: &str, trim_comments: bool) -> ViewResult<ParsedTemplate> {
    Parser {
        source,
        alias,
        trim_comments,
        stack: vec![Frame::new(None)],
        next_tag_id: 0,
        composition: None,
        doctype: None,
        xml_decl: None,
    }
    .run()
}

impl<'s> Parser<'s> {
    fn run(mut self) -> ViewResult<ParsedTemplate> {
        let mut reader = Reader::from_str(self.source);
        reader.config_mut().trim_text(false);

        loop {
            let event = reader.read_event();
            let pos = usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX);
            match event {
                Ok(Event::Start(e)) => self.start(&e, pos, false)?,
                Ok(Event::Empty(e)) => self.start(&e, pos, true)?,
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    self.end(&name, pos)?;
                }
                Ok(Event::Text(t)) => self.push_text(&String::from_utf8_lossy(&t)),
                Ok(Event::GeneralRef(r)) => {
                    self.push_text(&format!("&{};", String::from_utf8_lossy(&r)));
                }
                Ok(Event::CData(c)) => {
                    self.push_text(&format!("<![CDATA[{}]]>", String::from_utf8_lossy(&c)));
                }
                Ok(Event::Comment(c)) => {
                    if !self.trim_comments {
                        self.push_text(&format!("<!--{}-->", String::from_utf8_lossy(&c)));
                    }
                }
                Ok(Event::PI(p)) => {
                    self.push_text(&format!("<?{}?>", String::from_utf8_lossy(&p)));
                }
                Ok(Event::Decl(d)) => {
                    self.xml_decl = Some(format!("<?{}?>", String::from_utf8_lossy(&d)));
                }
                Ok(Event::DocType(d)) => {
                    self.doctype = Some(format!("<!DOCTYPE {}>", String::from_utf8_lossy(&d).trim()));
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    let at = usize::try_from(reader.error_position()).unwrap_or(usize::MAX);
                    return Err(self.error_at(at, e.to_string()));
                }
            }
        }

        if self.stack.len() > 1 {
            let open = self
                .stack
                .last()
                .and_then(|f| f.tag.as_ref())
                .map(OpenTag::qname)
                .unwrap_or_default();
            return Err(self.error_at(self.source.len(), format!("unclosed <{open}>")));
        }

        let mut root = self.stack.pop().unwrap_or_else(|| Frame::new(None));
        self.flush_text(&mut root, self.source.len())?;
        let handlers = match self.composition.take() {
            Some(composition) => vec![composition],
            None => root.body,
        };
        Ok(ParsedTemplate {
            handlers,
            doctype: self.doctype,
            xml_decl: self.xml_decl,
        })
    }

    fn line_at(&self, pos: usize) -> usize {
        let end = pos.min(self.source.len());
        self.source.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> ViewError {
        ViewError::compile(self.alias, self.line_at(pos), message)
    }

    fn tag_id(&mut self) -> String {
        let id = format!("t{}", self.next_tag_id);
        self.next_tag_id += 1;
        id
    }

    fn current(&mut self) -> &mut Frame {
        // the root frame is only popped at the end of `run`
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn push_text(&mut self, text: &str) {
        self.current().text.push_str(text);
    }

    /// Turn the pending text of `frame` into a text handler.
    fn flush_text(&mut self, frame: &mut Frame, pos: usize) -> ViewResult<()> {
        let text = std::mem::take(&mut frame.text);
        if text.trim().is_empty() {
            return Ok(());
        }
        let expr = ValueExpr::parse(&text).map_err(|m| self.error_at(pos, m))?;
        let tag_id = self.tag_id();
        frame.body.push(Handler::Text(TextHandler { tag_id, text: expr }));
        Ok(())
    }

    fn flush_current(&mut self, pos: usize) -> ViewResult<()> {
        let mut frame = self.stack.pop().unwrap_or_else(|| Frame::new(None));
        let result = self.flush_text(&mut frame, pos);
        self.stack.push(frame);
        result
    }

    fn start(&mut self, e: &BytesStart<'_>, pos: usize, empty: bool) -> ViewResult<()> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let Some((prefix, local)) = name.split_once(':') else {
            let markup = self.plain_start_tag(e, &name, empty, pos)?;
            self.push_text(&markup);
            return Ok(());
        };

        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.error_at(pos, err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let raw = String::from_utf8_lossy(&attr.value);
            attributes.push((key, unescape(&raw).into_owned()));
        }

        self.flush_current(pos)?;
        self.stack.push(Frame::new(Some(OpenTag {
            prefix: prefix.to_string(),
            local: local.to_string(),
            attributes,
            line: self.line_at(pos),
        })));
        if empty {
            self.end(&name, pos)?;
        }
        Ok(())
    }

    /// Literal start tag for plain markup; `xmlns:*` declarations are
    /// dropped.
    fn plain_start_tag(&self, e: &BytesStart<'_>, name: &str, empty: bool, pos: usize) -> ViewResult<String> {
        let mut markup = format!("<{name}");
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.error_at(pos, err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            if key.starts_with("xmlns:") {
                continue;
            }
            markup.push_str(&format!(" {key}=\"{}\"", String::from_utf8_lossy(&attr.value)));
        }
        markup.push_str(if empty { "/>" } else { ">" });
        Ok(markup)
    }

    fn end(&mut self, name: &str, pos: usize) -> ViewResult<()> {
        if !name.contains(':') {
            self.push_text(&format!("</{name}>"));
            return Ok(());
        }

        self.flush_current(pos)?;
        let frame = self.stack.pop().unwrap_or_else(|| Frame::new(None));
        let Some(tag) = frame.tag else {
            return Err(self.error_at(pos, format!("unexpected </{name}>")));
        };
        let handler = self.build(tag, frame.body)?;
        if let Some(handler) = handler {
            self.current().body.push(handler);
        }
        Ok(())
    }

    fn required<'t>(&self, tag: &'t OpenTag, name: &str) -> ViewResult<&'t str> {
        tag.attribute(name).ok_or_else(|| {
            ViewError::compile(
                self.alias,
                tag.line,
                format!("<{}> requires a `{name}` attribute", tag.qname()),
            )
        })
    }

    fn expr(&self, tag: &OpenTag, value: &str) -> ViewResult<ValueExpr> {
        ValueExpr::parse(value).map_err(|m| ViewError::compile(self.alias, tag.line, m))
    }

    /// Build the handler for a closed prefixed tag.
    fn build(&mut self, tag: OpenTag, body: Vec<Handler>) -> ViewResult<Option<Handler>> {
        let handler = match (tag.prefix.as_str(), tag.local.as_str()) {
            ("ui", "composition") | ("ui", "decorate") => {
                let decorate = tag.local == "decorate";
                let template = match tag.attribute("template") {
                    Some(t) => Some(self.expr(&tag, t)?),
                    None if decorate => {
                        self.required(&tag, "template")?;
                        None
                    }
                    None => None,
                };
                let handler = Handler::Composition(composition(&tag, template, decorate, body, self.alias));
                if !decorate && self.composition.is_none() {
                    self.composition = Some(handler.clone());
                }
                handler
            }
            ("ui", "define") => Handler::Define(DefineHandler {
                name: self.required(&tag, "name")?.to_string(),
                body: Arc::new(body),
            }),
            ("ui", "insert") => Handler::Insert(InsertHandler {
                client: Arc::new(InsertClient {
                    name: tag.attribute("name").map(str::to_string),
                    body,
                }),
            }),
            ("ui", "include") => {
                let src = self.expr(&tag, self.required(&tag, "src")?)?;
                Handler::Include(IncludeHandler {
                    src,
                    params: params_of(&body),
                })
            }
            ("ui", "param") => Handler::Param(ParamHandler {
                name: self.expr(&tag, self.required(&tag, "name")?)?,
                value: self.expr(&tag, self.required(&tag, "value")?)?,
            }),
            ("ui", "fragment") => Handler::Fragment(FragmentHandler {
                rendered: tag
                    .attribute("rendered")
                    .map(|r| self.expr(&tag, r))
                    .transpose()?,
                body,
            }),
            ("ui", "remove") => return Ok(None),
            ("ui", other) => {
                return Err(ViewError::compile(
                    self.alias,
                    tag.line,
                    format!("unknown tag <ui:{other}>"),
                ));
            }
            ("f", "metadata") => Handler::Metadata(MetadataHandler { body }),
            ("f", "facet") => Handler::Facet(FacetHandler {
                name: self.required(&tag, "name")?.to_string(),
                tag_id: self.tag_id(),
                body,
            }),
            ("f", "view") => Handler::Fragment(FragmentHandler {
                rendered: None,
                body,
            }),
            _ => self.component(tag, body)?,
        };
        Ok(Some(handler))
    }

    fn component(&mut self, tag: OpenTag, body: Vec<Handler>) -> ViewResult<Handler> {
        let mut id = None;
        let mut transient = false;
        let mut attributes = Vec::with_capacity(tag.attributes.len());
        for (key, value) in &tag.attributes {
            match key.as_str() {
                "id" => id = Some(self.expr(&tag, value)?),
                "transient" => transient = value.trim() == "true",
                _ => attributes.push((key.clone(), self.expr(&tag, value)?)),
            }
        }
        Ok(Handler::Component(ComponentHandler {
            tag: tag.qname(),
            tag_id: self.tag_id(),
            id,
            transient,
            attributes,
            body,
        }))
    }
}

fn composition(
    tag: &OpenTag,
    template: Option<ValueExpr>,
    decorate: bool,
    body: Vec<Handler>,
    alias: &str,
) -> CompositionHandler {
    let defines: FxHashMap<String, Arc<Vec<Handler>>> = body
        .iter()
        .filter_map(|h| match h {
            Handler::Define(d) => Some((d.name.clone(), Arc::clone(&d.body))),
            _ => None,
        })
        .collect();
    CompositionHandler {
        template,
        decorate,
        params: params_of(&body),
        client: Arc::new(CompositionClient { defines, body }),
        alias: alias.to_string(),
        line: tag.line,
    }
}

fn params_of(body: &[Handler]) -> Vec<ParamHandler> {
    body.iter()
        .filter_map(|h| match h {
            Handler::Param(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> ParsedTemplate {
        parse(source, "/t.xhtml", true).unwrap()
    }

    #[test]
    fn test_plain_markup_folds_into_text() {
        let parsed = parse_ok(r#"<div class="a"><p>Hi #{name}</p></div>"#);
        assert_eq!(parsed.handlers.len(), 1);
        assert!(matches!(parsed.handlers[0], Handler::Text(_)));
    }

    #[test]
    fn test_component_splits_text_runs() {
        let parsed = parse_ok(
            r##"<div xmlns:h="urn:h"><h:outputText id="out" value="#{v}"/><span>x</span></div>"##,
        );
        let kinds: Vec<_> = parsed
            .handlers
            .iter()
            .map(|h| match h {
                Handler::Text(_) => "text",
                Handler::Component(_) => "component",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["text", "component", "text"]);

        let Handler::Component(c) = &parsed.handlers[1] else {
            unreachable!()
        };
        assert_eq!(c.tag, "h:outputText");
        assert!(c.id.is_some());
        assert_eq!(c.attributes.len(), 1);
    }

    #[test]
    fn test_composition_trims_outside_content() {
        let parsed = parse_ok(
            r#"<html><body>ignored<ui:composition template="/layout.xhtml">
                <ui:define name="title">T</ui:define>
                <ui:param name="p" value="1"/>
            </ui:composition>ignored</body></html>"#,
        );
        assert_eq!(parsed.handlers.len(), 1);
        let Handler::Composition(c) = &parsed.handlers[0] else {
            unreachable!()
        };
        assert!(c.template.is_some());
        assert!(c.client.defines.contains_key("title"));
        assert_eq!(c.params.len(), 1);
    }

    #[test]
    fn test_doctype_and_declaration_are_captured() {
        let parsed = parse_ok("<?xml version=\"1.0\"?>\n<!DOCTYPE html>\n<html/>");
        assert_eq!(parsed.xml_decl.as_deref(), Some("<?xml version=\"1.0\"?>"));
        assert_eq!(parsed.doctype.as_deref(), Some("<!DOCTYPE html>"));
    }

    #[test]
    fn test_comments_follow_trim_setting() {
        let trimmed = parse("<p><!-- note --></p>", "/t.xhtml", true).unwrap();
        let kept = parse("<p><!-- note --></p>", "/t.xhtml", false).unwrap();
        let text = |p: &ParsedTemplate| match &p.handlers[0] {
            Handler::Text(t) => format!("{:?}", t.text),
            _ => String::new(),
        };
        assert!(!text(&trimmed).contains("note"));
        assert!(text(&kept).contains("note"));
    }

    #[test]
    fn test_ui_remove_is_dropped() {
        let parsed = parse_ok("<ui:remove><h:x/></ui:remove>");
        assert!(parsed.handlers.is_empty());
    }

    #[test]
    fn test_errors_carry_line() {
        let err = parse("<p>\n<ui:bogus/>\n</p>", "/t.xhtml", true).unwrap_err();
        match err {
            ViewError::Compile { alias, line, message } => {
                assert_eq!(alias, "/t.xhtml");
                assert_eq!(line, 2);
                assert!(message.contains("ui:bogus"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = parse("<ui:include/>", "/t.xhtml", true).unwrap_err();
        assert!(err.to_string().contains("`src`"));

        assert!(parse("<p>#{broken</p>", "/t.xhtml", true).is_err());
        assert!(parse("<p><b></p>", "/t.xhtml", true).is_err());
    }
}
