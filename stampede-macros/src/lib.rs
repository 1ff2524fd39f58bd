use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{Ident, ItemFn, LitStr};

/// Proc macro to denote a Scenario
///
/// Turns an `async fn(VuContext) -> Result<(), IterationError>` into a function returning
/// `impl Scenario`, named after the function. Pass a string to override the name used in the
/// `scenario` tag.
///
/// # Example
/// ```ignore
/// use stampede::prelude::*;
///
/// #[scenario]
/// async fn nextid(vu: VuContext) -> Result<(), IterationError> {
///     let res = vu.get("http://localhost:8888/nextid").await?;
///     vu.check(&res, "status is 200", |r| r.status == 200)?;
///     Ok(())
/// }
///
/// #[scenario("checkout flow")]
/// async fn checkout(vu: VuContext) -> Result<(), IterationError> {
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn scenario(attr: TokenStream, item: TokenStream) -> TokenStream {
    scenario_internal(attr.into(), item.into()).unwrap_or_else(syn::Error::into_compile_error).into()
}

fn scenario_internal(attr: TokenStream2, item: TokenStream2) -> syn::Result<TokenStream2> {
    let input = syn::parse2::<ItemFn>(item)?;

    if input.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            &input.sig.fn_token,
            "#[scenario] only works on async functions",
        ));
    }
    if input.sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &input.sig.inputs,
            "#[scenario] functions take exactly one `VuContext` argument",
        ));
    }

    let scen_name = input.sig.ident.clone();
    let name = if attr.is_empty() {
        LitStr::new(&scen_name.to_string(), scen_name.span())
    } else {
        syn::parse2::<LitStr>(attr)?
    };

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    let new_name = Ident::new(&format!("__stampede_{}", sig.ident), Span::call_site());
    let mut new_sig = sig.clone();
    new_sig.ident = new_name.clone();

    let mut scen_sig = sig;
    scen_sig.asyncness = None;
    scen_sig.inputs = Default::default();
    scen_sig.output = syn::parse2(quote! { -> impl ::stampede::scenario::Scenario })?;

    Ok(quote! {
        #(#attrs)* #vis #scen_sig {
            ::stampede::scenario::FnScenario::new(#name, #new_name)
        }

        #[doc(hidden)]
        #vis #new_sig #block
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_to_named_scenario() {
        let out = scenario_internal(
            quote! {},
            quote! {
                async fn nextid(vu: VuContext) -> Result<(), IterationError> {
                    Ok(())
                }
            },
        )
        .unwrap()
        .to_string();

        assert!(out.contains("fn nextid ()"));
        assert!(out.contains("FnScenario :: new (\"nextid\" , __stampede_nextid)"));
        assert!(out.contains("async fn __stampede_nextid (vu : VuContext)"));
    }

    #[test]
    fn accepts_name_override() {
        let out = scenario_internal(
            quote! { "checkout flow" },
            quote! {
                async fn checkout(vu: VuContext) -> Result<(), IterationError> {
                    Ok(())
                }
            },
        )
        .unwrap()
        .to_string();

        assert!(out.contains("FnScenario :: new (\"checkout flow\" , __stampede_checkout)"));
    }

    #[test]
    fn rejects_sync_functions() {
        let err = scenario_internal(
            quote! {},
            quote! {
                fn nextid(vu: VuContext) -> Result<(), IterationError> {
                    Ok(())
                }
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("async"));
    }
}
