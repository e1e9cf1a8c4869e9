use quote::quote;
use syn::spanned::Spanned;

/// Derive macro available if ardent is built with `features = ["derive"]`.
///
/// Struct attributes: `#[ardent(model = "...", connection = "...", environment = "...")]`.
/// Field attributes: `#[ardent(key)]`, `#[ardent(timestamps)]`,
/// `#[ardent(skip)]` and `#[ardent(rename = "...")]`.
#[proc_macro_derive(Entity, attributes(ardent))]
pub fn derive_entity(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let ast = syn::parse_macro_input!(input as syn::DeriveInput);

    match impl_entity(&ast) {
        Ok(body) => body.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct EntityInfo {
    model: Option<syn::LitStr>,
    connection: Option<syn::LitStr>,
    environment: Option<syn::LitStr>,
}

impl EntityInfo {
    fn from_attrs(attrs: &[syn::Attribute]) -> syn::Result<EntityInfo> {
        let mut info = EntityInfo::default();

        for attr in attrs {
            if !attr.path().is_ident("ardent") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("model") {
                    info.model = Some(meta.value()?.parse()?);
                    return Ok(());
                }

                if meta.path.is_ident("connection") {
                    info.connection = Some(meta.value()?.parse()?);
                    return Ok(());
                }

                if meta.path.is_ident("environment") {
                    info.environment = Some(meta.value()?.parse()?);
                    return Ok(());
                }

                Err(meta.error("unknown meta path"))
            })?;
        }

        Ok(info)
    }
}

struct FieldInfo {
    ident: syn::Ident,
    name: String,
    key: bool,
    timestamps: bool,
    skip: bool,
}

impl FieldInfo {
    fn from_field(field: &syn::Field) -> syn::Result<FieldInfo> {
        let ident = match &field.ident {
            Some(ident) => ident.clone(),
            None => return Err(syn::Error::new(field.span(), "expected a named field")),
        };
        let mut name = ident.to_string();
        let mut key = false;
        let mut timestamps = false;
        let mut skip = false;

        for attr in &field.attrs {
            if !attr.path().is_ident("ardent") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("key") {
                    key = true;
                    return Ok(());
                }

                if meta.path.is_ident("timestamps") {
                    timestamps = true;
                    return Ok(());
                }

                if meta.path.is_ident("skip") {
                    skip = true;
                    return Ok(());
                }

                if meta.path.is_ident("rename") {
                    let value: syn::LitStr = meta.value()?.parse()?;
                    name = value.value();
                    return Ok(());
                }

                Err(meta.error("unrecognized attr"))
            })?;
        }

        Ok(FieldInfo {
            ident,
            name,
            key,
            timestamps,
            skip,
        })
    }
}

/// Find the field marked with an attribute, falling back to the field
/// with the conventional name.
fn find_marked<'a>(
    fields: &'a [FieldInfo],
    marked: impl Fn(&FieldInfo) -> bool,
    conventional: &str,
    what: &str,
) -> syn::Result<Option<&'a FieldInfo>> {
    let mut found = fields.iter().filter(|f| marked(f));
    match (found.next(), found.next()) {
        (Some(_), Some(second)) => Err(syn::Error::new(
            second.ident.span(),
            format!("only one field can be the {what}"),
        )),
        (Some(field), None) => Ok(Some(field)),
        (None, _) => Ok(fields
            .iter()
            .find(|f| !f.skip && f.ident == conventional)),
    }
}

fn impl_entity(ast: &syn::DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    let fields = match &ast.data {
        syn::Data::Struct(syn::DataStruct {
            fields: syn::Fields::Named(fields),
            ..
        }) => &fields.named,
        _ => {
            return Err(syn::Error::new(
                ast.span(),
                "Entity can only be derived for structs with named fields",
            ))
        }
    };

    let info = EntityInfo::from_attrs(&ast.attrs)?;
    let fields = fields
        .iter()
        .map(FieldInfo::from_field)
        .collect::<syn::Result<Vec<_>>>()?;

    let key = find_marked(&fields, |f| f.key, "id", "key")?
        .ok_or_else(|| syn::Error::new(name.span(), "missing key field, add `#[ardent(key)]`"))?;
    let timestamps = find_marked(&fields, |f| f.timestamps, "timestamps", "timestamps")?
        .ok_or_else(|| {
            syn::Error::new(
                name.span(),
                "missing timestamps field, add `#[ardent(timestamps)] timestamps: ardent::Timestamps`",
            )
        })?;

    let key_ident = &key.ident;
    let key_name = &key.name;
    let ts_ident = &timestamps.ident;

    let data_fields: Vec<&FieldInfo> = fields
        .iter()
        .filter(|f| !f.skip && f.ident != *key_ident && f.ident != *ts_ident)
        .collect();
    let data_idents: Vec<_> = data_fields.iter().map(|f| &f.ident).collect();
    let data_names: Vec<_> = data_fields.iter().map(|f| &f.name).collect();
    let skipped: Vec<_> = fields.iter().filter(|f| f.skip).map(|f| &f.ident).collect();

    let model_name = match &info.model {
        Some(model) => quote!(::std::string::String::from(#model)),
        None => quote!(::ardent::record::default_model_name(stringify!(#name))),
    };
    let connection_name = info.connection.as_ref().map(|connection| {
        quote! {
            fn connection_name(&self) -> &str {
                #connection
            }
        }
    });
    let connection_environment = info.environment.as_ref().map(|environment| {
        quote! {
            fn connection_environment(&self) -> ::std::option::Option<&str> {
                ::std::option::Option::Some(#environment)
            }
        }
    });

    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics ::ardent::record::ToDocument for #name #ty_generics #where_clause {
            fn to_document(&self) -> ::ardent::value::Document {
                let mut document = ::ardent::value::Document::new();
                if let ::std::option::Option::Some(key) = ::ardent::value::KeyField::to_key(&self.#key_ident) {
                    document.insert(#key_name, key);
                }
                #(
                    document.insert(#data_names, &self.#data_idents);
                )*
                document.insert(::ardent::record::Timestamps::CREATED_AT, self.#ts_ident.created_at);
                document.insert(::ardent::record::Timestamps::UPDATED_AT, self.#ts_ident.updated_at);
                document
            }
        }

        #[automatically_derived]
        impl #impl_generics ::ardent::record::FromDocument for #name #ty_generics #where_clause {
            fn from_document(
                document: &::ardent::value::Document,
            ) -> ::std::result::Result<Self, ::ardent::Error> {
                ::std::result::Result::Ok(#name {
                    #key_ident: document.get_key(#key_name)?,
                    #(
                        #data_idents: document.get(#data_names)?,
                    )*
                    #ts_ident: ::ardent::record::Timestamps {
                        created_at: document.get(::ardent::record::Timestamps::CREATED_AT)?,
                        updated_at: document.get(::ardent::record::Timestamps::UPDATED_AT)?,
                    },
                    #(
                        #skipped: ::std::default::Default::default(),
                    )*
                })
            }
        }

        #[automatically_derived]
        impl #impl_generics ::ardent::record::Entity for #name #ty_generics #where_clause {
            fn model_name() -> ::std::string::String {
                #model_name
            }

            fn key_field() -> &'static str {
                #key_name
            }

            #connection_name

            #connection_environment

            fn key(&self) -> ::std::option::Option<::ardent::value::Key> {
                ::ardent::value::KeyField::to_key(&self.#key_ident)
            }

            fn set_key(&mut self, key: ::ardent::value::Key) -> ::std::result::Result<(), ::ardent::Error> {
                self.#key_ident = ::ardent::value::KeyField::from_key(key)?;
                ::std::result::Result::Ok(())
            }

            fn timestamps(&self) -> &::ardent::record::Timestamps {
                &self.#ts_ident
            }

            fn timestamps_mut(&mut self) -> &mut ::ardent::record::Timestamps {
                &mut self.#ts_ident
            }
        }
    })
}
