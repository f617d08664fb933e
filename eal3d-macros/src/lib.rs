use darling::ast::NestedMeta;
use darling::{Error, FromMeta};
use quote::quote;
use syn::{Data, DeriveInput, Fields, ItemStruct, parse_macro_input};

use proc_macro::TokenStream;

fn struct_members(input: &DeriveInput, derive: &str) -> Result<Vec<syn::Member>, syn::Error> {
    let Data::Struct(ref s) = input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            format!("{derive} can only be derived for structs"),
        ));
    };

    Ok(match s.fields {
        Fields::Named(ref nf) => nf
            .named
            .iter()
            .filter_map(|f| f.ident.clone())
            .map(syn::Member::from)
            .collect(),
        Fields::Unnamed(ref uf) => (0..uf.unnamed.len())
            .map(|i| syn::Index::from(i).into())
            .collect(),
        Fields::Unit => Vec::new(),
    })
}

/// Serializes every field in declaration order, big-endian.
#[proc_macro_derive(ToBytes)]
pub fn derive_to_bytes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match struct_members(&input, "ToBytes") {
        Ok(fields) => fields,
        Err(e) => return e.to_compile_error().into(),
    };

    let expanded = quote! {
        impl crate::byteorder::WriteBytesBe for #name {
            #[allow(unused_variables)]
            fn write_be(&self, dst: &mut Vec<u8>) {
                #( crate::byteorder::WriteBytesBe::write_be(&self.#fields, dst); )*
            }
        }
    };

    TokenStream::from(expanded)
}

/// Reads every field in declaration order, big-endian. Yields `None` when the
/// source runs out.
#[proc_macro_derive(FromBytes)]
pub fn derive_from_bytes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match struct_members(&input, "FromBytes") {
        Ok(fields) => fields,
        Err(e) => return e.to_compile_error().into(),
    };

    let body = match input.data {
        Data::Struct(syn::DataStruct {
            fields: Fields::Unit,
            ..
        }) => quote! { Self },
        _ => quote! {
            Self {
                #( #fields: crate::byteorder::ReadBytesBe::read_be(src)?, )*
            }
        },
    };

    let expanded = quote! {
        impl crate::byteorder::ReadBytesBe for #name {
            #[allow(unused_variables)]
            fn read_be(src: &mut &[u8]) -> Option<Self> {
                Some(#body)
            }
        }
    };

    TokenStream::from(expanded)
}

#[derive(Debug, FromMeta)]
struct ChunkIdArgs {
    id: u16,
}

/// Marks a struct as the fixed part of a header B chunk, e.g.
/// `#[chunk_id(id = 0x4400)]`. The struct must also derive `ToBytes`.
#[proc_macro_attribute]
pub fn chunk_id(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match NestedMeta::parse_meta_list(attr.into()) {
        Ok(v) => v,
        Err(e) => {
            return TokenStream::from(Error::from(e).write_errors());
        }
    };
    let args = match ChunkIdArgs::from_list(&args) {
        Ok(v) => v,
        Err(e) => {
            return TokenStream::from(e.write_errors());
        }
    };
    let id = args.id;

    let input = parse_macro_input!(item as ItemStruct);
    let name = &input.ident;

    let expanded = quote! {
        #input

        impl crate::container::header_b::Chunk for #name {
            const ID: u16 = #id;
        }
    };
    TokenStream::from(expanded)
}
