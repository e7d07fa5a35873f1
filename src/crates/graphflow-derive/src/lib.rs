//! `#[derive(ClassTask)]`: generates the mechanical parts of
//! `graphflow_core::task::ClassTask` for a struct whose wireable fields are
//! declared as `Input<T>`.
//!
//! Grounded in the derive-macro convention the workspace already follows
//! for shipping a `*-derive` crate alongside a core crate of hand-written
//! traits (see `dashflow-derive` in the retrieval pack): this crate only
//! generates boilerplate accessors and trait plumbing, never task-running
//! logic.
//!
//! Supplements the distilled spec's plain trait with the descriptor-style
//! attribute table `znflow`'s `zninit`-based `Node` class builds at class
//! definition time (`examples/original_source/znflow/node.py`), which the
//! distillation dropped but a complete implementation wants: without it,
//! every `ClassTask` impl would hand-write an identical `attribute_names`/
//! `get_attr_json`/`get_ref`/`apply_attr_json` quartet.
//!
//! Requires the struct to have exactly one plain `id: TaskId` field (the
//! task's identity, protected per spec.md's Class Task row) plus any number
//! of `Input<T>` fields, each of which becomes a public attribute with a
//! generated per-field accessor method of the same name.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, GenericArgument, PathArguments, Type};

#[proc_macro_derive(ClassTask)]
pub fn derive_class_task(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return syn::Error::new_spanned(&input, "ClassTask requires named fields")
                    .to_compile_error()
                    .into()
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "ClassTask can only be derived for structs")
                .to_compile_error()
                .into()
        }
    };

    let has_id_field = fields.iter().any(|f| {
        f.ident.as_ref().map(|i| i == "id").unwrap_or(false) && extract_input_inner(&f.ty).is_none()
    });
    if !has_id_field {
        return syn::Error::new_spanned(
            &input,
            "ClassTask requires a plain `id: TaskId` field",
        )
        .to_compile_error()
        .into();
    }

    let mut attr_names = Vec::new();
    let mut accessors = Vec::new();
    let mut get_arms = Vec::new();
    let mut ref_arms = Vec::new();
    let mut apply_arms = Vec::new();

    for field in fields {
        let Some(ident) = &field.ident else { continue };
        if ident == "id" {
            continue;
        }
        let Some(inner) = extract_input_inner(&field.ty) else {
            continue;
        };
        let name_str = ident.to_string();
        attr_names.push(name_str.clone());

        get_arms.push(quote! {
            #name_str => match &self.#ident {
                ::graphflow_core::task::Input::Value(v) => ::graphflow_core::__private::serde_json::to_value(v).ok(),
                ::graphflow_core::task::Input::Ref(_) => None,
            }
        });
        ref_arms.push(quote! {
            #name_str => match &self.#ident {
                ::graphflow_core::task::Input::Ref(r) => Some(r.clone()),
                ::graphflow_core::task::Input::Value(_) => None,
            }
        });
        apply_arms.push(quote! {
            #name_str => match ::graphflow_core::__private::serde_json::from_value::<#inner>(value) {
                Ok(v) => { self.#ident = ::graphflow_core::task::Input::Value(v); true }
                Err(_) => false,
            }
        });
        accessors.push(quote! {
            pub fn #ident(&self) -> ::graphflow_core::task::Input<#inner>
            where
                #inner: Clone,
            {
                if ::graphflow_core::scope::is_active() {
                    ::graphflow_core::task::Input::Ref(
                        ::graphflow_core::reference::Reference::Connection(
                            ::graphflow_core::reference::Connection::to_attribute(self.id, #name_str),
                        ),
                    )
                } else {
                    match &self.#ident {
                        ::graphflow_core::task::Input::Value(v) => ::graphflow_core::task::Input::Value(v.clone()),
                        ::graphflow_core::task::Input::Ref(r) => ::graphflow_core::task::Input::Ref(r.clone()),
                    }
                }
            }
        });
    }

    let attr_count = attr_names.len();
    let type_name_str = name.to_string();

    let get_attr_body = if get_arms.is_empty() {
        quote! { None }
    } else {
        quote! { match name { #(#get_arms,)* _ => None } }
    };
    let ref_body = if ref_arms.is_empty() {
        quote! { None }
    } else {
        quote! { match name { #(#ref_arms,)* _ => None } }
    };
    let apply_body = if apply_arms.is_empty() {
        quote! { false }
    } else {
        quote! { match name { #(#apply_arms,)* _ => false } }
    };

    let accessors_impl = if accessors.is_empty() {
        quote! {}
    } else {
        quote! {
            impl #name {
                #(#accessors)*
            }
        }
    };

    let expanded = quote! {
        impl ::graphflow_core::task::ClassTask for #name {
            fn task_id(&self) -> ::graphflow_core::task::TaskId {
                self.id
            }

            fn set_task_id(&mut self, id: ::graphflow_core::task::TaskId) {
                self.id = id;
            }

            fn attribute_names(&self) -> &'static [&'static str] {
                const NAMES: [&str; #attr_count] = [#(#attr_names),*];
                &NAMES
            }

            fn get_attr_json(&self, name: &str) -> Option<::graphflow_core::__private::serde_json::Value> {
                #get_attr_body
            }

            fn get_ref(&self, name: &str) -> Option<::graphflow_core::reference::Reference> {
                #ref_body
            }

            fn apply_attr_json(&mut self, name: &str, value: ::graphflow_core::__private::serde_json::Value) -> bool {
                #apply_body
            }

            fn run(&mut self) -> ::graphflow_core::error::Result<()> {
                #name::run(self)
            }

            fn type_name(&self) -> &'static str {
                #type_name_str
            }
        }

        #accessors_impl
    };

    expanded.into()
}

/// Extracts `T` from a field type written as `Input<T>`, returning `None`
/// for any other shape (including `Input<T>` written behind a path prefix
/// other than a single unqualified segment, which this macro doesn't
/// attempt to resolve).
fn extract_input_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else { return None };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Input" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(t) => Some(t),
        _ => None,
    })
}

