//! Global scope wrapper
//!
//! Built once per environment. Its objects are host-owned, so they never
//! count against the script's heap budget.

use crate::context::{HostCapabilities, WorkerKind};
use crate::heap::{ErrorKind, Heap, NativeFunction, ObjectId, ObjectKind};
use crate::interpreter::{Scope, ScopeRef};
use crate::{LogLevel, Value};

#[derive(Debug)]
pub struct GlobalScope {
    object: ObjectId,
    lexical: ScopeRef,
    host: HostCapabilities,
}

impl GlobalScope {
    pub(crate) fn build(heap: &mut Heap, host: &HostCapabilities) -> Self {
        let base = host.base();
        let mut properties: Vec<(String, Value)> = Vec::new();

        let console = LogLevel::CONSOLE_METHODS
            .iter()
            .map(|method| {
                let level = LogLevel::from_str(method);
                (method.to_string(), native(heap, NativeFunction::Console(level)))
            })
            .collect();
        properties.push((
            "console".into(),
            Value::Object(heap.allocate_host(ObjectKind::Ordinary, console)),
        ));

        let json = vec![
            ("stringify".to_string(), native(heap, NativeFunction::JsonStringify)),
            ("parse".to_string(), native(heap, NativeFunction::JsonParse)),
        ];
        properties.push((
            "JSON".into(),
            Value::Object(heap.allocate_host(ObjectKind::Ordinary, json)),
        ));

        let mut env: Vec<(String, Value)> = base
            .env()
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
            .collect();
        env.sort_by(|a, b| a.0.cmp(&b.0));
        properties.push((
            "env".into(),
            Value::Object(heap.allocate_host(ObjectKind::Ordinary, env)),
        ));

        for kind in ErrorKind::CONSTRUCTORS {
            properties.push((
                kind.name().to_string(),
                native(heap, NativeFunction::ErrorConstructor(kind)),
            ));
        }

        properties.push(("location".into(), Value::from(base.location())));
        properties.push(("close".into(), native(heap, NativeFunction::Close)));
        properties.push(("NaN".into(), Value::Number(f64::NAN)));
        properties.push(("Infinity".into(), Value::Number(f64::INFINITY)));

        match host {
            HostCapabilities::Dedicated(_) => {
                properties.push(("postMessage".into(), native(heap, NativeFunction::PostMessage)));
                properties.push(("onmessage".into(), Value::Null));
            }
            HostCapabilities::Shared(context) => {
                properties.push(("name".into(), Value::from(context.name())));
                properties.push(("onconnect".into(), Value::Null));
            }
        }

        let object = heap.allocate_host(ObjectKind::Ordinary, properties);
        heap.get_mut(object).set("self", Value::Object(object));
        base.attach_wrapper();

        tracing::debug!(kind = %host.kind(), location = base.location(), "global scope created");

        Self {
            object,
            lexical: Scope::global(),
            host: host.clone(),
        }
    }

    /// The object scripts see as `self`
    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn kind(&self) -> WorkerKind {
        self.host.kind()
    }

    pub fn host(&self) -> &HostCapabilities {
        &self.host
    }

    pub(crate) fn lexical(&self) -> &ScopeRef {
        &self.lexical
    }
}

fn native(heap: &mut Heap, function: NativeFunction) -> Value {
    Value::Object(heap.allocate_host(ObjectKind::Native(function), Vec::new()))
}
