use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Ident, ItemFn, Token};

/// Runs an `async fn` test on a fresh runtime.
///
/// Accepted flags: `multi_thread` (worker-thread runtime instead of the
/// current-thread one) and `start_paused` (tokio clock starts paused, timers
/// auto-advance when the runtime is idle).
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Test)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Main)
}

enum MacroKind {
    Test,
    Main,
}

#[derive(Default)]
struct RuntimeFlags {
    multi_thread: bool,
    start_paused: bool,
}

fn parse_flags(attr: TokenStream) -> syn::Result<RuntimeFlags> {
    let mut flags = RuntimeFlags::default();
    if attr.is_empty() {
        return Ok(flags);
    }

    let idents = Punctuated::<Ident, Token![,]>::parse_terminated.parse(attr)?;
    for ident in idents {
        match ident.to_string().as_str() {
            "multi_thread" => flags.multi_thread = true,
            "start_paused" => flags.start_paused = true,
            other => {
                return Err(syn::Error::new_spanned(
                    &ident,
                    format!(
                        "unknown core_async runtime flag `{}` (expected `multi_thread` or `start_paused`)",
                        other
                    ),
                ))
            }
        }
    }

    if flags.multi_thread && flags.start_paused {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "`start_paused` requires the current-thread runtime",
        ));
    }

    Ok(flags)
}

fn expand(attr: TokenStream, item: TokenStream, kind: MacroKind) -> TokenStream {
    let flags = match parse_flags(attr) {
        Ok(flags) => flags,
        Err(err) => return err.to_compile_error().into(),
    };

    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "core_async attribute macros require `async fn`",
        )
        .to_compile_error()
        .into();
    }

    let mut sync_sig = input.sig.clone();
    sync_sig.asyncness = None;

    let attrs = input.attrs;
    let vis = input.vis;
    let block = input.block;

    let runner = runner_path(&flags);
    let test_attr: TokenStream2 = match kind {
        MacroKind::Test => quote!(#[test]),
        MacroKind::Main => TokenStream2::new(),
    };

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sync_sig {
            #runner(async move #block)
        }
    }
    .into()
}

fn runner_path(flags: &RuntimeFlags) -> TokenStream2 {
    if flags.multi_thread {
        quote!(core_async::runtime::block_on_multi_thread)
    } else if flags.start_paused {
        quote!(core_async::runtime::block_on_paused)
    } else {
        quote!(core_async::runtime::block_on)
    }
}
