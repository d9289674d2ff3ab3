//! Path routing, middleware chaining, and exception dispatch (§4.4).
mod route;

use std::collections::HashMap;
use std::sync::Arc;

use crate::http::{Method, Request, Response};
use route::CompiledPattern;

/// An error raised by a handler, tagged with a `kind` so exception handlers
/// can be matched against it (§9 "tagged error enum plus an ordered list").
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub kind: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {}

pub type HandlerResult = Result<Response, HandlerError>;
pub type Handler = Arc<dyn Fn(&Request) -> HandlerResult + Send + Sync>;
pub type Middleware = Arc<dyn Fn(&Request, &mut Response) -> bool + Send + Sync>;
pub type ExceptionPredicate = Arc<dyn Fn(&HandlerError) -> bool + Send + Sync>;
pub type ExceptionHandler = Arc<dyn Fn(&HandlerError, &Request, &mut Response) + Send + Sync>;

struct Route {
    pattern: CompiledPattern,
    handler: Handler,
}

/// Holds an ordered route list per method, an ordered middleware chain, and
/// an ordered list of `(predicate, handler)` exception dispatch pairs.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, Vec<Route>>,
    middleware: Vec<Middleware>,
    exception_handlers: Vec<(ExceptionPredicate, ExceptionHandler)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route. Later registrations for the same method are only
    /// reached if every earlier one's matcher rejects the path (§4.4:
    /// "ties are resolved by registration order, not specificity").
    pub fn add<F>(&mut self, method: Method, pattern: &str, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.routes.entry(method).or_default().push(Route {
            pattern: CompiledPattern::compile(pattern),
            handler: Arc::new(handler),
        });
    }

    pub fn get<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(Method::Get, pattern, handler);
    }

    pub fn post<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(Method::Post, pattern, handler);
    }

    pub fn put<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(Method::Put, pattern, handler);
    }

    pub fn delete<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(Method::Delete, pattern, handler);
    }

    pub fn patch<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(Method::Patch, pattern, handler);
    }

    pub fn head<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(Method::Head, pattern, handler);
    }

    pub fn options<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(Method::Options, pattern, handler);
    }

    /// Appends to the middleware chain. Middleware run in registration
    /// order against a response that starts as `Response::new(200)`; one
    /// returning `false` short-circuits routing entirely (glossary
    /// "Middleware").
    pub fn use_middleware<F>(&mut self, middleware: F)
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(middleware));
    }

    /// Registers an exception handler behind a predicate. Predicates are
    /// tried in registration order; the first that accepts the raised
    /// error's kind wins (§4.4 "Exception dispatch", §9).
    pub fn on_exception<P, F>(&mut self, predicate: P, handler: F)
    where
        P: Fn(&HandlerError) -> bool + Send + Sync + 'static,
        F: Fn(&HandlerError, &Request, &mut Response) + Send + Sync + 'static,
    {
        self.exception_handlers.push((Arc::new(predicate), Arc::new(handler)));
    }

    /// Runs the full pipeline starting from a fresh `Response::new(200)`.
    pub fn handle(&self, request: &mut Request) -> Response {
        self.handle_with(request, Response::new(200))
    }

    /// Runs the full pipeline: middleware, then route matching, then the
    /// matched handler, then exception dispatch if it raised (§4.4, §4.5).
    /// Continues from `response` instead of fabricating one, so a caller
    /// that already ran a pre-filter (which mutates a `Response` before
    /// deciding whether to let the request through) doesn't lose that
    /// work on the allow path.
    pub fn handle_with(&self, request: &mut Request, mut response: Response) -> Response {
        for mw in &self.middleware {
            if !mw(request, &mut response) {
                return response;
            }
        }

        let route_list = match self.routes.get(&request.method) {
            Some(list) => list,
            None => {
                apply_not_found(&mut response);
                return response;
            }
        };

        let matched = route_list
            .iter()
            .find_map(|route| route.pattern.matches(&request.path).map(|params| (route, params)));

        let (route, params) = match matched {
            Some(found) => found,
            None => {
                apply_not_found(&mut response);
                return response;
            }
        };

        request.path_params = params;

        match (route.handler)(request) {
            Ok(mut resp) => {
                resp.absorb_from(&response);
                resp
            }
            Err(err) => {
                response.status = 500;
                match self.exception_handlers.iter().find(|(pred, _)| pred(&err)) {
                    Some((_, handler)) => handler(&err, request, &mut response),
                    None => default_500(&err, request, &mut response),
                }
                response
            }
        }
    }
}

fn apply_not_found(response: &mut Response) {
    response.status = 404;
    response.body = "404 Not Found".to_string();
}

/// The built-in 500 handler used when no registered exception handler
/// matches the raised error's kind (§4.4, §7 "built-in 500 HTML handler").
fn default_500(err: &HandlerError, request: &Request, response: &mut Response) {
    tracing::error!(kind = %err.kind, message = %err.message, "unhandled error in handler");
    response.status = 500;
    response.header("Content-Type", "text/html; charset=utf-8");
    response.body = format!(
        "<html><body><h1>500 Internal Server Error</h1><p>{} {}</p></body></html>",
        request.method, request.path
    );
}
