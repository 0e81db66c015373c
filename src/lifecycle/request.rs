//! Request model and the request-scoped context threaded through the
//! lifecycle and the view engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::exception::QueuedException;
use super::phase::PhaseId;
use crate::core::ProjectStage;
use crate::tree::ComponentTree;
use crate::view::IdAliasMapper;

/// Request attribute set by the container when forwarding to an error page.
pub const ERROR_PAGE_MARKER: &str = "jakarta.servlet.error.message";

/// Inbound request, reduced to what the engine reads.
#[derive(Debug, Clone)]
pub struct Request {
    postback: bool,
    path_info: Option<String>,
    servlet_path: Option<String>,
    include_path_info: Option<String>,
    include_servlet_path: Option<String>,
    params: BTreeMap<String, String>,
    /// Keys are lowercase.
    headers: BTreeMap<String, String>,
    scheme: String,
    server_name: String,
    server_port: u16,
    context_path: String,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            postback: false,
            path_info: None,
            servlet_path: None,
            include_path_info: None,
            include_servlet_path: None,
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            scheme: "http".to_string(),
            server_name: "localhost".to_string(),
            server_port: 80,
            context_path: String::new(),
        }
    }
}

impl Request {
    /// Plain navigation to `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path_info: Some(path.into()),
            ..Self::default()
        }
    }

    /// Form resubmission of the view at `path`.
    pub fn postback(path: impl Into<String>) -> Self {
        Self {
            postback: true,
            ..Self::get(path)
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_path_info(mut self, path: Option<String>) -> Self {
        self.path_info = path;
        self
    }

    pub fn with_servlet_path(mut self, path: impl Into<String>) -> Self {
        self.servlet_path = Some(path.into());
        self
    }

    /// Paths of an include dispatch; they take precedence over the
    /// request's own.
    pub fn with_include_paths(mut self, path_info: Option<String>, servlet_path: Option<String>) -> Self {
        self.include_path_info = path_info;
        self.include_servlet_path = servlet_path;
        self
    }

    pub fn with_server(mut self, scheme: impl Into<String>, name: impl Into<String>, port: u16) -> Self {
        self.scheme = scheme.into();
        self.server_name = name.into();
        self.server_port = port;
        self
    }

    pub fn with_context_path(mut self, path: impl Into<String>) -> Self {
        self.context_path = path.into();
        self
    }

    #[inline]
    pub fn is_postback(&self) -> bool {
        self.postback
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// View id: include path info, path info, include servlet path, then
    /// servlet path.
    pub fn view_path(&self) -> Option<&str> {
        self.include_path_info
            .as_deref()
            .or(self.path_info.as_deref())
            .or(self.include_servlet_path.as_deref())
            .or(self.servlet_path.as_deref())
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }
}

/// Everything one request carries through the lifecycle.
///
/// Owned by the worker handling the request; never shared.
#[derive(Debug)]
pub struct RequestContext {
    request: Request,
    attributes: FxHashMap<String, String>,
    stage: ProjectStage,
    contracts: Vec<String>,
    id_mapper: Option<Arc<IdAliasMapper>>,
    doctype: Option<String>,
    xml_decl: Option<String>,
    view_id: Option<String>,
    tree: Option<ComponentTree>,
    phase: Option<PhaseId>,
    render_response: bool,
    response_complete: bool,
    exceptions: Vec<QueuedException>,
    response: Option<String>,
}

impl RequestContext {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            attributes: FxHashMap::default(),
            stage: ProjectStage::default(),
            contracts: Vec::new(),
            id_mapper: None,
            doctype: None,
            xml_decl: None,
            view_id: None,
            tree: None,
            phase: None,
            render_response: false,
            response_complete: false,
            exceptions: Vec::new(),
            response: None,
        }
    }

    pub fn with_stage(mut self, stage: ProjectStage) -> Self {
        self.stage = stage;
        self
    }

    /// Active resource-library contracts, in lookup order.
    pub fn with_contracts(mut self, contracts: Vec<String>) -> Self {
        self.contracts = contracts;
        self
    }

    /// Start with a view that is already built (e.g. a forwarded error page).
    pub fn with_tree(mut self, tree: ComponentTree) -> Self {
        self.view_id = Some(tree.view_id().to_string());
        self.tree = Some(tree);
        self
    }

    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    #[inline]
    pub fn is_postback(&self) -> bool {
        self.request.is_postback()
    }

    #[inline]
    pub fn stage(&self) -> ProjectStage {
        self.stage
    }

    #[inline]
    pub fn contracts(&self) -> &[String] {
        &self.contracts
    }

    pub fn set_contracts(&mut self, contracts: Vec<String>) {
        self.contracts = contracts;
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    pub fn is_error_page(&self) -> bool {
        self.attributes.contains_key(ERROR_PAGE_MARKER)
    }

    // ========================================================================
    // View state
    // ========================================================================

    pub fn id_mapper(&self) -> Option<&Arc<IdAliasMapper>> {
        self.id_mapper.as_ref()
    }

    pub fn set_id_mapper(&mut self, mapper: Option<Arc<IdAliasMapper>>) {
        self.id_mapper = mapper;
    }

    pub fn doctype(&self) -> Option<&str> {
        self.doctype.as_deref()
    }

    pub fn set_doctype(&mut self, doctype: impl Into<String>) {
        self.doctype = Some(doctype.into());
    }

    pub fn xml_decl(&self) -> Option<&str> {
        self.xml_decl.as_deref()
    }

    pub fn set_xml_decl(&mut self, decl: impl Into<String>) {
        self.xml_decl = Some(decl.into());
    }

    pub fn view_id(&self) -> Option<&str> {
        self.view_id.as_deref()
    }

    /// Change the view to render; during RenderResponse this triggers a
    /// rebuild for the new id.
    pub fn set_view_id(&mut self, view_id: impl Into<String>) {
        self.view_id = Some(view_id.into());
    }

    pub fn tree(&self) -> Option<&ComponentTree> {
        self.tree.as_ref()
    }

    pub fn tree_mut(&mut self) -> Option<&mut ComponentTree> {
        self.tree.as_mut()
    }

    pub fn set_tree(&mut self, tree: ComponentTree) {
        self.tree = Some(tree);
    }

    pub fn take_tree(&mut self) -> Option<ComponentTree> {
        self.tree.take()
    }

    // ========================================================================
    // Lifecycle flags
    // ========================================================================

    pub fn current_phase(&self) -> Option<PhaseId> {
        self.phase
    }

    pub(crate) fn set_current_phase(&mut self, phase: PhaseId) {
        self.phase = Some(phase);
    }

    /// Skip to RenderResponse after the current phase.
    pub fn render_response(&mut self) {
        self.render_response = true;
    }

    #[inline]
    pub fn is_render_response(&self) -> bool {
        self.render_response
    }

    /// Stop the lifecycle; nothing further runs, rendering included.
    pub fn response_complete(&mut self) {
        self.response_complete = true;
    }

    #[inline]
    pub fn is_response_complete(&self) -> bool {
        self.response_complete
    }

    pub fn queue_exception(&mut self, exception: QueuedException) {
        self.exceptions.push(exception);
    }

    pub fn queued_exceptions(&self) -> &[QueuedException] {
        &self.exceptions
    }

    pub(crate) fn take_exceptions(&mut self) -> Vec<QueuedException> {
        std::mem::take(&mut self.exceptions)
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn set_response(&mut self, response: impl Into<String>) {
        self.response = Some(response.into());
    }
}
