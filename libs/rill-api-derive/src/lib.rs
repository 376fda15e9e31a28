use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, GenericArgument, LitStr, PathArguments, Type};

/// Derive macro for output config parameter declarations.
///
/// Generates two methods on the annotated struct:
///
/// - `config_params() -> Vec<ConfigParam>` — parameter declarations for the output spec.
/// - `from_config(&ConfigValues) -> Result<Self, PluginError>` — reads typed values.
///
/// The struct must implement `Default` (defaults are used for non-required params).
///
/// # Example
///
/// ```ignore
/// #[derive(ConfigParams, Default)]
/// pub struct MyConfig {
///     #[param(description = "Server address", example = "localhost:6667")]
///     pub address: String,
///
///     #[param(secret, description = "Password")]
///     pub password: String,
///
///     #[param(optional, advanced, description = "Database name")]
///     pub database: Option<String>,
/// }
/// ```
///
/// Field attributes: `description = "..."` (mandatory), `required`, `optional`,
/// `secret`, `advanced`, `example = "..."`.
///
/// Supported field types: `bool`, `i64`, `u64`, `usize`, `f64`, `String`,
/// `Option<String>`, `Duration`, `BatchPolicy`.
#[proc_macro_derive(ConfigParams, attributes(param))]
pub fn derive_config_params(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match derive_impl(&input) {
        Ok(tokens) => tokens,
        Err(e) => e.to_compile_error().into(),
    }
}

#[derive(Default)]
struct ParamAttrs {
    description: Option<String>,
    example: Option<String>,
    required: bool,
    optional: bool,
    secret: bool,
    advanced: bool,
}

fn parse_attrs(field: &syn::Field) -> Result<ParamAttrs, syn::Error> {
    let mut attrs = ParamAttrs::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("param") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("description") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.description = Some(value.value());
            } else if meta.path.is_ident("example") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.example = Some(value.value());
            } else if meta.path.is_ident("required") {
                attrs.required = true;
            } else if meta.path.is_ident("optional") {
                attrs.optional = true;
            } else if meta.path.is_ident("secret") {
                attrs.secret = true;
            } else if meta.path.is_ident("advanced") {
                attrs.advanced = true;
            } else {
                return Err(meta.error("unknown param attribute"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

fn derive_impl(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "ConfigParams only supports structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "ConfigParams only supports structs",
            ))
        }
    };

    let mut config_param_tokens = Vec::new();
    let mut from_config_tokens = Vec::new();

    for field in fields {
        let field_name = field.ident.as_ref().ok_or_else(|| {
            syn::Error::new_spanned(field, "expected named field")
        })?;
        let field_name_str = field_name.to_string();
        let field_ty = &field.ty;

        let attrs = parse_attrs(field)?;
        let description_str = attrs.description.ok_or_else(|| {
            syn::Error::new_spanned(field_name, "missing #[param(description = \"...\")]")
        })?;
        if attrs.required && attrs.optional {
            return Err(syn::Error::new_spanned(
                field_name,
                "a param cannot be both required and optional",
            ));
        }

        let ty_name = type_ident_name(field_ty).ok_or_else(|| {
            syn::Error::new_spanned(field_ty, "unsupported type for ConfigParams")
        })?;

        let is_option = ty_name == "Option";
        if is_option && option_inner_name(field_ty).as_deref() != Some("String") {
            return Err(syn::Error::new_spanned(
                field_ty,
                "only Option<String> is supported",
            ));
        }
        if is_option && attrs.required {
            return Err(syn::Error::new_spanned(
                field_name,
                "Option fields cannot be required",
            ));
        }
        let optional = attrs.optional || is_option;

        // (param type, default value, read from config as Option<field type>)
        let (param_type_expr, default_expr, read_expr): (TokenStream2, TokenStream2, TokenStream2) =
            match ty_name.as_str() {
                "u64" => (
                    quote! { rill_api::config::ParamType::U64 },
                    quote! { Some(rill_api::config::ParamValue::U64(__defaults.#field_name)) },
                    quote! { __config.get_u64(#field_name_str) },
                ),
                "usize" => (
                    quote! { rill_api::config::ParamType::U64 },
                    quote! { Some(rill_api::config::ParamValue::U64(__defaults.#field_name as u64)) },
                    quote! { __config.get_u64(#field_name_str).map(|v| v as usize) },
                ),
                "i64" => (
                    quote! { rill_api::config::ParamType::I64 },
                    quote! { Some(rill_api::config::ParamValue::I64(__defaults.#field_name)) },
                    quote! { __config.get_i64(#field_name_str) },
                ),
                "f64" => (
                    quote! { rill_api::config::ParamType::F64 },
                    quote! { Some(rill_api::config::ParamValue::F64(__defaults.#field_name)) },
                    quote! { __config.get_f64(#field_name_str) },
                ),
                "bool" => (
                    quote! { rill_api::config::ParamType::Bool },
                    quote! { Some(rill_api::config::ParamValue::Bool(__defaults.#field_name)) },
                    quote! { __config.get_bool(#field_name_str) },
                ),
                "String" => (
                    quote! { rill_api::config::ParamType::Str },
                    quote! { Some(rill_api::config::ParamValue::Str(__defaults.#field_name.clone())) },
                    quote! { __config.get_str(#field_name_str).map(|v| v.to_string()) },
                ),
                "Option" => (
                    quote! { rill_api::config::ParamType::Str },
                    quote! { __defaults.#field_name.clone().map(rill_api::config::ParamValue::Str) },
                    quote! { __config.get_str(#field_name_str).map(|v| Some(v.to_string())) },
                ),
                "Duration" => (
                    quote! { rill_api::config::ParamType::Duration },
                    quote! { Some(rill_api::config::ParamValue::Duration(__defaults.#field_name)) },
                    quote! { __config.get_duration(#field_name_str) },
                ),
                "BatchPolicy" => (
                    quote! { rill_api::config::ParamType::BatchPolicy },
                    quote! { Some(rill_api::config::ParamValue::BatchPolicy(__defaults.#field_name.clone())) },
                    quote! { __config.get_batch_policy(#field_name_str).cloned() },
                ),
                _ => {
                    return Err(syn::Error::new_spanned(
                        field_ty,
                        format!(
                            "unsupported type '{ty_name}' (expected u64, i64, f64, bool, String, \
                             usize, Option<String>, Duration, BatchPolicy)"
                        ),
                    ))
                }
            };

        let getter_expr = if attrs.required {
            quote! {
                result.#field_name = #read_expr
                    .ok_or_else(|| rill_api::error::PluginError::config(
                        format!("missing required parameter '{}'", #field_name_str)
                    ))?;
            }
        } else {
            quote! {
                if let Some(v) = #read_expr {
                    result.#field_name = v;
                }
            }
        };

        let default_value = if attrs.required {
            quote! { None }
        } else {
            default_expr
        };

        let example_expr = match &attrs.example {
            Some(ex) => quote! { Some(#ex.to_string()) },
            None => quote! { None },
        };
        let required = attrs.required;
        let secret = attrs.secret;
        let advanced = attrs.advanced;

        config_param_tokens.push(quote! {
            rill_api::config::ConfigParam {
                name: #field_name_str.to_string(),
                param_type: #param_type_expr,
                required: #required,
                optional: #optional,
                secret: #secret,
                advanced: #advanced,
                default: #default_value,
                example: #example_expr,
                description: #description_str.to_string(),
            }
        });

        from_config_tokens.push(getter_expr);
    }

    let expanded = quote! {
        impl #name {
            pub fn config_params() -> Vec<rill_api::config::ConfigParam> {
                let __defaults = Self::default();
                vec![
                    #(#config_param_tokens),*
                ]
            }

            pub fn from_config(
                __config: &rill_api::config::ConfigValues,
            ) -> Result<Self, rill_api::error::PluginError> {
                let mut result = Self::default();
                #(#from_config_tokens)*
                Ok(result)
            }
        }
    };

    Ok(TokenStream::from(expanded))
}

/// Extract the last path segment ident name from a type (e.g. `u64`, `String`).
fn type_ident_name(ty: &Type) -> Option<String> {
    if let Type::Path(type_path) = ty {
        type_path
            .path
            .segments
            .last()
            .map(|seg| seg.ident.to_string())
    } else {
        None
    }
}

/// Inner type name of `Option<T>`.
fn option_inner_name(ty: &Type) -> Option<String> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let seg = type_path.path.segments.last()?;
    let PathArguments::AngleBracketed(args) = &seg.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => type_ident_name(inner),
        _ => None,
    }
}
