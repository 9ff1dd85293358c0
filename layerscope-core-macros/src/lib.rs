//! `#[derive(Redacted)]` generates a `Debug` impl that skips every field
//! tagged `#[redact]`. Used on types that carry callbacks or transport handles
//! which have no useful (or no available) `Debug` representation.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields};

#[proc_macro_derive(Redacted, attributes(redact))]
pub fn derive_redacted(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident.clone();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match input.data {
        Data::Struct(ref data) => {
            struct_debug(&name, (impl_generics, ty_generics, where_clause), data)
        }
        Data::Enum(ref data) => enum_debug(&name, (impl_generics, ty_generics, where_clause), data),
        Data::Union(_) => {
            return syn::Error::new_spanned(name, "Redacted derive does not support unions")
                .to_compile_error()
                .into();
        }
    };

    body.into()
}

fn is_redacted(field: &syn::Field) -> bool {
    field.attrs.iter().any(|attr| attr.path().is_ident("redact"))
}

fn struct_debug(
    name: &syn::Ident,
    generics: (
        syn::ImplGenerics<'_>,
        syn::TypeGenerics<'_>,
        Option<&syn::WhereClause>,
    ),
    data: &syn::DataStruct,
) -> proc_macro2::TokenStream {
    let (impl_generics, ty_generics, where_clause) = generics;
    match &data.fields {
        Fields::Named(fields) => {
            let any_redacted = fields.named.iter().any(is_redacted);
            let writers: Vec<_> = fields
                .named
                .iter()
                .filter(|f| !is_redacted(f))
                .filter_map(|f| f.ident.as_ref())
                .map(|ident| quote! { .field(stringify!(#ident), &self.#ident) })
                .collect();
            let finish = if any_redacted {
                quote! { .finish_non_exhaustive() }
            } else {
                quote! { .finish() }
            };
            quote! {
                impl #impl_generics ::std::fmt::Debug for #name #ty_generics #where_clause {
                    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                        f.debug_struct(stringify!(#name))
                            #(#writers)*
                            #finish
                    }
                }
            }
        }
        Fields::Unnamed(fields) => {
            let elems: Vec<_> = fields
                .unnamed
                .iter()
                .enumerate()
                .filter(|(_, f)| !is_redacted(f))
                .map(|(i, _)| {
                    let idx = syn::Index::from(i);
                    quote! { &self.#idx }
                })
                .collect();
            quote! {
                impl #impl_generics ::std::fmt::Debug for #name #ty_generics #where_clause {
                    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                        let mut d = f.debug_tuple(stringify!(#name));
                        #( d.field(#elems); )*
                        d.finish()
                    }
                }
            }
        }
        Fields::Unit => {
            quote! {
                impl #impl_generics ::std::fmt::Debug for #name #ty_generics #where_clause {
                    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                        f.write_str(stringify!(#name))
                    }
                }
            }
        }
    }
}

fn enum_debug(
    name: &syn::Ident,
    generics: (
        syn::ImplGenerics<'_>,
        syn::TypeGenerics<'_>,
        Option<&syn::WhereClause>,
    ),
    data: &syn::DataEnum,
) -> proc_macro2::TokenStream {
    let (impl_generics, ty_generics, where_clause) = generics;
    let arms: Vec<_> = data.variants.iter().map(|v| {
        let vident = &v.ident;
        match &v.fields {
            Fields::Unit => {
                quote! { #name::#vident => f.write_str(concat!(stringify!(#name), "::", stringify!(#vident))) }
            }
            Fields::Unnamed(fields) => {
                let bindings: Vec<_> = (0..fields.unnamed.len()).map(|i| format_ident!("f{}", i)).collect();
                let writes: Vec<_> = fields.unnamed.iter().zip(&bindings).filter_map(|(fld, b)| {
                    if is_redacted(fld) {
                        None
                    } else {
                        Some(quote! { dbg_fields.field(#b); })
                    }
                }).collect();
                quote! {
                    #name::#vident( #( ref #bindings ),* ) => {
                        let mut dbg_fields = f.debug_tuple(stringify!(#vident));
                        #(#writes)*
                        dbg_fields.finish()
                    }
                }
            }
            Fields::Named(fields) => {
                let bindings: Vec<_> = fields.named.iter().filter_map(|fld| fld.ident.clone()).collect();
                let writes: Vec<_> = fields.named.iter().filter(|fld| !is_redacted(fld)).filter_map(|fld| {
                    fld.ident.as_ref().map(|id| quote! { dbg_fields.field(stringify!(#id), #id); })
                }).collect();
                quote! {
                    #name::#vident { #( ref #bindings ),* } => {
                        let mut dbg_fields = f.debug_struct(stringify!(#vident));
                        #(#writes)*
                        dbg_fields.finish()
                    }
                }
            }
        }
    }).collect();

    quote! {
        impl #impl_generics ::std::fmt::Debug for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#arms),*
                }
            }
        }
    }
}
