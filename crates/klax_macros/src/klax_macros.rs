//! Klax Macros - Proc macros for native function bindings
//!
//! This crate provides the `#[klax_function]` attribute macro, which turns a
//! plain Rust function into an entry of the runtime's `FunctionRegistry`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    Expr, FnArg, GenericArgument, ItemFn, Lit, Meta, Pat, PathArguments, ReturnType, Token, Type,
    parse::{Parse, ParseStream},
    parse_macro_input,
};

/// Parsed attributes for the klax_function macro
struct KlaxFunctionAttrs {
    key: String,
    name: Option<String>,
    category: String,
    pure: bool,
    outputs: Option<Vec<String>>,
}

impl Parse for KlaxFunctionAttrs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut key = None;
        let mut name = None;
        let mut category = None;
        let mut pure = false;
        let mut outputs = None;

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let lit: Lit = input.parse()?;

            match (ident.to_string().as_str(), lit) {
                ("key", Lit::Str(s)) => key = Some(s.value()),
                ("name", Lit::Str(s)) => name = Some(s.value()),
                ("category", Lit::Str(s)) => category = Some(s.value()),
                ("pure", Lit::Bool(b)) => pure = b.value(),
                // Comma separated output pin names, for tuple returns
                ("outputs", Lit::Str(s)) => {
                    outputs = Some(s.value().split(',').map(|n| n.trim().to_string()).collect())
                }
                (other, _) => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown or malformed attribute: {other}"),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(KlaxFunctionAttrs {
            key: key.ok_or_else(|| input.error("missing required attribute 'key'"))?,
            name,
            category: category.ok_or_else(|| input.error("missing required attribute 'category'"))?,
            pure,
            outputs,
        })
    }
}

/// Extract doc comments from attributes
fn extract_doc_comment(attrs: &[syn::Attribute]) -> Option<String> {
    let docs: Vec<String> = attrs
        .iter()
        .filter_map(|attr| {
            if !attr.path().is_ident("doc") {
                return None;
            }
            if let Meta::NameValue(meta) = &attr.meta {
                if let Expr::Lit(expr_lit) = &meta.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        return Some(s.value().trim().to_string());
                    }
                }
            }
            None
        })
        .collect();

    if docs.is_empty() {
        None
    } else {
        Some(docs.join("\n"))
    }
}

/// Derive display name from function key (e.g., "math/add" -> "add")
fn derive_name(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).to_string()
}

/// Pin label for a parameter ("max_value" -> "Max Value")
fn pin_label(ident: &str) -> String {
    ident
        .trim_start_matches('_')
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// If `ty` is `Result<T, _>`, returns `T`
fn unwrap_result(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Result" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(ty) => Some(ty),
        _ => None,
    })
}

/// Splits a return type into its output pin types (`()` -> none, tuples -> one per field)
fn output_types(ty: &Type) -> Vec<Type> {
    match ty {
        Type::Tuple(tuple) => tuple.elems.iter().cloned().collect(),
        Type::Paren(inner) => output_types(&inner.elem),
        other => vec![other.clone()],
    }
}

/// Attribute macro for binding a native function into the registry.
///
/// # Attributes
///
/// - `key` (required): Stable registry key (e.g., "math/add")
/// - `category` (required): Catalog category (e.g., "Math")
/// - `name` (optional): Display name (defaults to the last part of the key)
/// - `pure` (optional): Pure functions become implicit nodes (default: false)
/// - `outputs` (optional): Output pin names for tuple returns, comma separated
///
/// Parameters must implement `FromValue + PinTyped`, results
/// `IntoValue + PinTyped`. A `Result<T, InvokeError>` return is unwrapped and
/// its error surfaced to the interpreter.
///
/// # Example
///
/// ```ignore
/// /// Add two integers.
/// #[klax_function(key = "math/add_int", category = "Math", pure = true)]
/// fn add_int(a: i64, b: i64) -> i64 {
///     a + b
/// }
/// ```
///
/// This generates:
/// - The original function
/// - `add_int_info() -> FunctionInfo` - the catalog entry
/// - `register_add_int(registry: &mut FunctionRegistry)` - registers the binding
#[proc_macro_attribute]
pub fn klax_function(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attrs = parse_macro_input!(attr as KlaxFunctionAttrs);
    let input_fn = parse_macro_input!(item as ItemFn);

    match expand(attrs, input_fn) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(attrs: KlaxFunctionAttrs, input_fn: ItemFn) -> syn::Result<TokenStream2> {
    let fn_name = &input_fn.sig.ident;
    let fn_vis = &input_fn.vis;
    let doc_comment = extract_doc_comment(&input_fn.attrs);

    let key = &attrs.key;
    let name = attrs.name.clone().unwrap_or_else(|| derive_name(key));
    let category = &attrs.category;
    let pure = attrs.pure;

    let info_fn_name = format_ident!("{}_info", fn_name);
    let register_fn_name = format_ident!("register_{}", fn_name);

    let description_expr = match doc_comment {
        Some(doc) => quote! { Some(#doc.to_string()) },
        None => quote! { None },
    };

    // Parameters
    let mut input_infos = Vec::new();
    let mut reads = Vec::new();
    let mut args = Vec::new();
    for (index, input) in input_fn.sig.inputs.iter().enumerate() {
        let FnArg::Typed(pat_type) = input else {
            return Err(syn::Error::new_spanned(input, "methods cannot be bound"));
        };
        let Pat::Ident(ident) = &*pat_type.pat else {
            return Err(syn::Error::new_spanned(
                &pat_type.pat,
                "parameters must be plain identifiers",
            ));
        };
        let ty = &pat_type.ty;
        let label = pin_label(&ident.ident.to_string());
        let arg = format_ident!("arg{}", index);

        input_infos.push(quote! {
            klax_runtime::klax_types::ParameterInfo::new(
                #label,
                <#ty as klax_runtime::klax_types::PinTyped>::pin_type(),
            )
        });
        reads.push(quote! {
            let #arg = <#ty as klax_runtime::klax_types::FromValue>::from_value(
                inputs
                    .get(#index)
                    .ok_or(klax_runtime::klax_types::InvokeError::MissingArgument(#index))?,
            )
            .map_err(|source| klax_runtime::klax_types::InvokeError::InvalidArgument {
                index: #index,
                source,
            })?;
        });
        args.push(arg);
    }

    // Results
    let (fallible, result_ty) = match &input_fn.sig.output {
        ReturnType::Default => (false, None),
        ReturnType::Type(_, ty) => match unwrap_result(ty) {
            Some(inner) => (true, Some(inner.clone())),
            None => (false, Some((**ty).clone())),
        },
    };
    let result_types = result_ty.as_ref().map(output_types).unwrap_or_default();
    let is_tuple = matches!(result_ty, Some(Type::Tuple(_)));

    let output_names: Vec<String> = match &attrs.outputs {
        Some(names) if names.len() == result_types.len() => names.clone(),
        Some(_) => {
            return Err(syn::Error::new_spanned(
                &input_fn.sig.output,
                "`outputs` must name every returned value",
            ));
        }
        None if result_types.len() == 1 => vec!["Result".to_string()],
        None => (0..result_types.len()).map(|i| format!("Result {i}")).collect(),
    };

    let output_infos = result_types.iter().zip(&output_names).map(|(ty, label)| {
        quote! {
            klax_runtime::klax_types::ParameterInfo::new(
                #label,
                <#ty as klax_runtime::klax_types::PinTyped>::pin_type(),
            )
        }
    });

    let call = if fallible {
        quote! { #fn_name(#(#args),*)? }
    } else {
        quote! { #fn_name(#(#args),*) }
    };

    let write_back = if is_tuple {
        let fields: Vec<_> = (0..result_types.len())
            .map(|i| format_ident!("out{}", i))
            .collect();
        quote! {
            let (#(#fields),*) = #call;
            #(outputs.push(klax_runtime::klax_types::IntoValue::into_value(#fields));)*
        }
    } else if result_types.is_empty() {
        quote! { #call; }
    } else {
        quote! {
            let result = #call;
            outputs.push(klax_runtime::klax_types::IntoValue::into_value(result));
        }
    };

    Ok(quote! {
        #input_fn

        /// Returns the registry entry for this function.
        #fn_vis fn #info_fn_name() -> klax_runtime::FunctionInfo {
            klax_runtime::FunctionInfo {
                key: #key.to_string(),
                name: #name.to_string(),
                category: #category.to_string(),
                pure: #pure,
                description: #description_expr,
                inputs: vec![#(#input_infos),*],
                outputs: vec![#(#output_infos),*],
            }
        }

        /// Registers this function with the given registry.
        #fn_vis fn #register_fn_name(registry: &mut klax_runtime::FunctionRegistry) {
            registry.register_fn(
                #info_fn_name(),
                |inputs: &[klax_runtime::klax_types::Value],
                 outputs: &mut Vec<klax_runtime::klax_types::Value>|
                 -> Result<(), klax_runtime::klax_types::InvokeError> {
                    #(#reads)*
                    #write_back
                    Ok(())
                },
            );
        }
    })
}
