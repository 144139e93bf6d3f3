//! Procedural macros for the deep agent runtime.
//!
//! Currently provides `#[traceable]`, which wraps a function body in a
//! `tracing` span named after the function so call boundaries show up in
//! structured logs without each middleware hand-rolling `tracing::info_span!`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Wrap a function (sync or async) in a debug-level tracing span named after
/// the function. `skip = "a,b"` is accepted for call-site compatibility with
/// `tracing::instrument`-style usage but is currently a no-op: argument values
/// are never recorded, only entry/exit of the span, so there is nothing to skip.
///
/// ```ignore
/// #[traceable(skip = "model,options")]
/// pub fn create_deep_agent(model: Arc<dyn ChatModel>, options: DeepAgentOptions) -> Result<...> {
///     ...
/// }
/// ```
#[proc_macro_attribute]
pub fn traceable(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    let fn_name = sig.ident.to_string();
    let is_async = sig.asyncness.is_some();

    let output = if is_async {
        quote! {
            #(#attrs)*
            #vis #sig {
                use ::tracing::Instrument as _;
                let __span = ::tracing::debug_span!(#fn_name);
                async move #block .instrument(__span).await
            }
        }
    } else {
        quote! {
            #(#attrs)*
            #vis #sig {
                let __span = ::tracing::debug_span!(#fn_name);
                let __entered = __span.enter();
                let __result = (move || #block)();
                drop(__entered);
                __result
            }
        }
    };

    output.into()
}
