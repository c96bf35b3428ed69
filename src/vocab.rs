//! The DToU vocabulary: one fixed namespace for every domain class and predicate.

use oxigraph::model::NamedNodeRef;

/// Namespace of all DToU classes and predicates.
pub const DTOU_NS: &str = "http://example.org/ns#";

/// Prefix under which [`DTOU_NS`] is declared in queries and serialized output.
pub const DTOU_PREFIX: &str = "dtou";

/// `xsd:` namespace, declared alongside `dtou:` in serialized output.
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// Notation3 `log:` builtin namespace.
pub const LOG_NS: &str = "http://www.w3.org/2000/10/swap/log#";

/// Notation3 `math:` builtin namespace.
pub const MATH_NS: &str = "http://www.w3.org/2000/10/swap/math#";

/// IRI of the usage-context node emitted for every request.
pub const USAGE_CONTEXT_NODE: &str = "urn:dtou:server#usage1";

macro_rules! dtou_terms {
    ($($name:ident => $local:literal),* $(,)?) => {
        $(
            pub const $name: NamedNodeRef<'static> =
                NamedNodeRef::new_unchecked(concat!("http://example.org/ns#", $local));
        )*
    };
}

dtou_terms! {
    APP_POLICY => "AppPolicy",
    INPUT_SPEC => "InputSpec",
    PORT => "Port",
    DERIVED_POLICY => "DerivedPolicy",
    USAGE_CONTEXT => "UsageContext",
    APP_INFO => "AppInfo",
    DATA => "data",
    OUTPUT_SPEC => "output_spec",
    PORT_REL => "port",
    NAME => "name",
    POLICY => "policy",
    USER => "user",
    TIME => "time",
    APP => "app",
    TARGET => "target",
}

/// The SPARQL prologue declaring the `dtou:` prefix.
pub fn sparql_prologue() -> String {
    format!("PREFIX {DTOU_PREFIX}: <{DTOU_NS}>\n")
}
