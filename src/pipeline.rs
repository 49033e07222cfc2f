//! Per-request middleware pipeline.
//!
//! A [`Pipeline`] owns the resolved middleware for one request and runs them
//! in list order in front of a [`Destination`]. There are no nested closures:
//! [`Next`] carries the remaining slice of the stack, and each call to
//! [`Next::run`] peels one middleware off the front.
//!
//! ```text
//! [trace, auth:api, bindings] → destination
//!  trace.handle(req, next₁)
//!    └ auth.handle(req, next₂, ["api"])
//!        └ bindings.handle(req, next₃)
//!            └ destination.dispatch(req)
//! ```

use async_trait::async_trait;

use crate::error::Error;
use crate::middleware::{MiddlewareRegistry, Resolved};
use crate::request::Request;
use crate::response::Response;

/// The terminal action of a pipeline. Runs only if no middleware
/// short-circuits.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn dispatch(&self, req: Request) -> Result<Response, Error>;
}

/// The remaining middleware and the destination behind them.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stack: &'a [Resolved],
    destination: &'a dyn Destination,
}

impl Next<'_> {
    /// Hands `req` to the next middleware, or to the destination when none
    /// are left.
    pub async fn run(self, req: Request) -> Result<Response, Error> {
        match self.stack.split_first() {
            Some((head, rest)) => {
                let next = Next { stack: rest, destination: self.destination };
                head.middleware.handle(req, next, &head.params).await
            }
            None => self.destination.dispatch(req).await,
        }
    }
}

/// An ordered, resolved middleware stack.
pub struct Pipeline {
    stack: Vec<Resolved>,
}

impl Pipeline {
    pub fn new(stack: Vec<Resolved>) -> Self {
        Self { stack }
    }

    /// Resolves every identifier. The first unknown one fails the whole
    /// pipeline; nothing runs.
    pub fn through<S: AsRef<str>>(registry: &MiddlewareRegistry, ids: &[S]) -> Result<Self, Error> {
        let stack = ids
            .iter()
            .map(|id| registry.resolve(id.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(stack))
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Sends `req` through the stack and on to `destination`.
    pub async fn then(&self, req: Request, destination: &dyn Destination) -> Result<Response, Error> {
        Next { stack: &self.stack, destination }.run(req).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::middleware::Middleware;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Record {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Middleware for Record {
        async fn handle(&self, req: Request, next: Next<'_>, params: &[String]) -> Result<Response, Error> {
            self.log.lock().unwrap().push(format!("{}{:?}", self.name, params));
            next.run(req).await
        }
    }

    struct Stop;

    #[async_trait]
    impl Middleware for Stop {
        async fn handle(&self, _req: Request, _next: Next<'_>, _: &[String]) -> Result<Response, Error> {
            Ok(Response::status(StatusCode::FORBIDDEN))
        }
    }

    struct Echo(Log);

    #[async_trait]
    impl Destination for Echo {
        async fn dispatch(&self, req: Request) -> Result<Response, Error> {
            self.0.lock().unwrap().push("destination".to_owned());
            Ok(Response::text(req.path().to_owned()))
        }
    }

    fn request() -> Request {
        Request::from(http::Request::builder().uri("/hello").body(Bytes::new()).unwrap())
    }

    fn registry(log: &Log) -> MiddlewareRegistry {
        MiddlewareRegistry::new()
            .register("a", Record { name: "a", log: Arc::clone(log) })
            .register("b", Record { name: "b", log: Arc::clone(log) })
            .register("stop", Stop)
    }

    #[tokio::test]
    async fn runs_middleware_in_list_order_then_destination() {
        let log = Log::default();
        let pipeline = Pipeline::through(&registry(&log), &["b", "a:x,y"]).unwrap();
        let res = pipeline.then(request(), &Echo(Arc::clone(&log))).await.unwrap();

        assert_eq!(res.body().as_ref(), b"/hello");
        assert_eq!(*log.lock().unwrap(), vec!["b[]", r#"a["x", "y"]"#, "destination"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest() {
        let log = Log::default();
        let pipeline = Pipeline::through(&registry(&log), &["a", "stop", "b"]).unwrap();
        let res = pipeline.then(request(), &Echo(Arc::clone(&log))).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(*log.lock().unwrap(), vec!["a[]"]);
    }

    #[tokio::test]
    async fn empty_pipeline_goes_straight_to_destination() {
        let log = Log::default();
        let pipeline = Pipeline::new(Vec::new());
        assert!(pipeline.is_empty());
        pipeline.then(request(), &Echo(Arc::clone(&log))).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["destination"]);
    }

    #[test]
    fn unknown_identifier_fails_resolution() {
        let log = Log::default();
        assert!(Pipeline::through(&registry(&log), &["a", "nope"]).is_err());
    }
}
