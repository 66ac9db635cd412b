//! # wirecall procedural macros
//!
//! `#[wirecall::interface]` turns a trait of `async fn`s into an RPC
//! interface:
//!
//! ```rust,ignore
//! #[wirecall::interface]
//! pub trait Calculator {
//!     async fn add(&self, a: i64, b: i64) -> wirecall::Result<i64>;
//!
//!     #[rpc(name = "calc.type")]
//!     async fn type_(&self) -> wirecall::Result<String>;
//!
//!     #[rpc(object_params, rename(lhs = "left"))]
//!     async fn sub(&self, lhs: i64, rhs: i64) -> wirecall::Result<i64>;
//!
//!     #[rpc(skip)]
//!     fn local_only(&self) -> u32 {
//!         0
//!     }
//! }
//! ```
//!
//! The trait gains `NAME`, `METHODS` and `register_interface`, and a
//! `CalculatorProxy<T>` implementing it over a `wirecall::Client<T>` is
//! emitted next to it.
//!
//! RPC methods take `&self` and owned arguments and return
//! `Result<T, E>` where `T` is serde-compatible and `E` converts both from
//! and into `wirecall::Error`.

mod attr;

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    FnArg, Ident, ItemTrait, Pat, ReturnType, TraitItem, TraitItemFn, Type, parse_macro_input,
    parse_quote,
};

use attr::RpcAttr;

const RESERVED: &[&str] = &["register_interface"];

struct RpcMethod {
    ident: Ident,
    args: Vec<(Ident, Type)>,
    output: Type,
}

/// Defines an RPC interface. See the crate docs.
#[proc_macro_attribute]
pub fn interface(_attr: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as ItemTrait);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(mut input: ItemTrait) -> syn::Result<proc_macro2::TokenStream> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "generic interfaces are not supported",
        ));
    }

    let krate = get_crate_name();
    let trait_ident = input.ident.clone();
    let trait_name = trait_ident.to_string();
    let vis = input.vis.clone();

    let mut errors: Option<syn::Error> = None;
    let mut descriptors = vec![];
    let mut methods = vec![];
    for item in &mut input.items {
        let TraitItem::Fn(method) = item else {
            continue;
        };
        match rewrite_method(method) {
            Ok(None) => {}
            Ok(Some((rpc, attr))) => {
                descriptors.push(descriptor(&krate, &rpc, &attr));
                methods.push(rpc);
            }
            Err(e) => match &mut errors {
                Some(errors) => errors.combine(e),
                None => errors = Some(e),
            },
        }
    }
    if let Some(errors) = errors {
        return Err(errors);
    }

    let registrations = methods.iter().enumerate().map(|(idx, rpc)| {
        let method_ident = &rpc.ident;
        let arg_idents = rpc.args.iter().map(|(ident, _)| ident).collect::<Vec<_>>();
        let arg_types = rpc.args.iter().map(|(_, ty)| ty);
        quote! {
            {
                let __this = ::std::sync::Arc::clone(&self);
                let __descriptor = <Self as #trait_ident>::METHODS[#idx];
                let __name = __descriptor.name(router.settings()).to_owned();
                router.register_handler(
                    __name,
                    move |__req: #krate::Request, __responder: #krate::Responder| -> #krate::Result<()> {
                        let mut __params = __descriptor.read_params(__req.params)?;
                        #( let #arg_idents: #arg_types = __params.arg()?; )*
                        let __this = ::std::sync::Arc::clone(&__this);
                        __responder.spawn_reply(async move {
                            <Self as #trait_ident>::#method_ident(&*__this, #(#arg_idents),*).await
                        });
                        Ok(())
                    },
                );
            }
        }
    });

    input.items.push(parse_quote! {
        const NAME: &'static str = #trait_name;
    });
    input.items.push(parse_quote! {
        const METHODS: &'static [#krate::MethodDescriptor] = &[#(#descriptors),*];
    });
    input.items.push(parse_quote! {
        /// Registers a handler for every RPC method on `router`.
        fn register_interface(self: ::std::sync::Arc<Self>, router: &mut #krate::Router)
        where
            Self: ::core::marker::Sized + ::core::marker::Send + ::core::marker::Sync + 'static,
        {
            #(#registrations)*
        }
    });

    let proxy_ident = format_ident!("{}Proxy", trait_ident);
    let proxy_doc = format!("Calls `{trait_name}` on a remote peer through a client.");
    let proxy_methods = methods.iter().enumerate().map(|(idx, rpc)| {
        let method_ident = &rpc.ident;
        let output = &rpc.output;
        let arg_idents = rpc.args.iter().map(|(ident, _)| ident).collect::<Vec<_>>();
        let arg_types = rpc.args.iter().map(|(_, ty)| ty);
        quote! {
            fn #method_ident(&self, #(#arg_idents: #arg_types),*)
                -> impl ::core::future::Future<Output = #output> + ::core::marker::Send
            {
                let __descriptor = &<Self as #trait_ident>::METHODS[#idx];
                let __params = __descriptor.encode_params(::std::vec![
                    #( #krate::__private::to_value(&#arg_idents) ),*
                ]);
                let __method = __descriptor.name(&self.settings).to_owned();
                let __timeout = self.settings.response_timeout;
                async move { self.client.call(&__method, __params, __timeout).await }
            }
        }
    });

    Ok(quote! {
        #input

        #[doc = #proxy_doc]
        #vis struct #proxy_ident<T: #krate::Transport> {
            client: ::std::sync::Arc<#krate::Client<T>>,
            settings: #krate::Settings,
        }

        impl<T: #krate::Transport> #proxy_ident<T> {
            /// Uses the client's settings for naming and timeouts.
            pub fn new(client: ::std::sync::Arc<#krate::Client<T>>) -> Self {
                let settings = client.settings().clone();
                Self { client, settings }
            }

            pub fn with_settings(
                client: ::std::sync::Arc<#krate::Client<T>>,
                settings: #krate::Settings,
            ) -> Self {
                Self { client, settings }
            }

            pub fn client(&self) -> &::std::sync::Arc<#krate::Client<T>> {
                &self.client
            }
        }

        impl<T: #krate::Transport> ::core::clone::Clone for #proxy_ident<T> {
            fn clone(&self) -> Self {
                Self {
                    client: ::std::sync::Arc::clone(&self.client),
                    settings: self.settings.clone(),
                }
            }
        }

        impl<T: #krate::Transport> #trait_ident for #proxy_ident<T> {
            #(#proxy_methods)*
        }
    })
}

/// Validates one trait method and rewrites it to return a `Send` future.
/// Skipped methods are left as they are and yield `None`.
fn rewrite_method(method: &mut TraitItemFn) -> syn::Result<Option<(RpcMethod, RpcAttr)>> {
    let attr = RpcAttr::take(&mut method.attrs)?;
    let sig = &method.sig;
    if attr.skip {
        if method.default.is_none() {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "a method marked `#[rpc(skip)]` needs a default body",
            ));
        }
        return Ok(None);
    }

    if RESERVED.iter().any(|name| sig.ident == *name) {
        return Err(syn::Error::new_spanned(
            &sig.ident,
            format!("`{}` is reserved by `#[interface]`", sig.ident),
        ));
    }
    if method.default.is_some() {
        return Err(syn::Error::new_spanned(
            &sig.ident,
            "an RPC method cannot have a default body; use `#[rpc(skip)]` for local helpers",
        ));
    }
    if sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            sig.fn_token,
            "an RPC method must be an `async fn`; use `#[rpc(skip)]` for local helpers",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "generic RPC methods are not supported",
        ));
    }
    match sig.receiver() {
        Some(receiver)
            if receiver.reference.is_some()
                && receiver.mutability.is_none()
                && receiver.colon_token.is_none() => {}
        _ => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "an RPC method must take `&self`",
            ));
        }
    }
    let output = match &sig.output {
        ReturnType::Type(_, ty) => (**ty).clone(),
        ReturnType::Default => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "an RPC method must return a `Result`",
            ));
        }
    };

    let mut args = vec![];
    for input in sig.inputs.iter().skip(1) {
        let FnArg::Typed(arg) = input else {
            continue;
        };
        let Pat::Ident(pat) = &*arg.pat else {
            return Err(syn::Error::new_spanned(
                &arg.pat,
                "RPC arguments must be plain identifiers",
            ));
        };
        if let Type::Reference(ty) = &*arg.ty {
            return Err(syn::Error::new_spanned(ty, "RPC arguments must be owned"));
        }
        args.push((pat.ident.clone(), (*arg.ty).clone()));
    }
    for (ident, _) in &attr.renames {
        if !args.iter().any(|(arg, _)| arg == ident) {
            return Err(syn::Error::new_spanned(ident, "no such argument"));
        }
    }

    let rpc = RpcMethod {
        ident: sig.ident.clone(),
        args,
        output: output.clone(),
    };

    method.sig.asyncness = None;
    method.sig.output = parse_quote! {
        -> impl ::core::future::Future<Output = #output> + ::core::marker::Send
    };
    Ok(Some((rpc, attr)))
}

fn descriptor(
    krate: &proc_macro2::TokenStream,
    rpc: &RpcMethod,
    attr: &RpcAttr,
) -> proc_macro2::TokenStream {
    let ident = rpc.ident.to_string();
    let rpc_name = match &attr.name {
        Some(name) => quote! { ::core::option::Option::Some(#name) },
        None => quote! { ::core::option::Option::None },
    };
    let params = rpc.args.iter().map(|(ident, _)| attr.wire_name(ident));
    let object_params = attr.object_params;
    quote! {
        #krate::MethodDescriptor {
            ident: #ident,
            rpc_name: #rpc_name,
            params: &[#(#params),*],
            object_params: #object_params,
        }
    }
}

/// Resolves the path of the `wirecall` crate as seen by the caller. The
/// crate itself declares `extern crate self as wirecall`.
pub(crate) fn get_crate_name() -> proc_macro2::TokenStream {
    match proc_macro_crate::crate_name("wirecall") {
        Ok(proc_macro_crate::FoundCrate::Name(name)) => {
            let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
            quote! { ::#ident }
        }
        _ => quote! { ::wirecall },
    }
}
