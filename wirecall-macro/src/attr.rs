use syn::{Attribute, Ident, LitStr};

/// Options collected from `#[rpc(...)]` on one trait method.
#[derive(Default)]
pub(crate) struct RpcAttr {
    pub name: Option<LitStr>,
    pub skip: bool,
    pub object_params: bool,
    pub renames: Vec<(Ident, LitStr)>,
}

impl RpcAttr {
    /// Parses and strips every `#[rpc(...)]` attribute from `attrs`.
    pub fn take(attrs: &mut Vec<Attribute>) -> syn::Result<Self> {
        let mut out = Self::default();
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("rpc")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    out.name = Some(meta.value()?.parse()?);
                    Ok(())
                } else if meta.path.is_ident("skip") {
                    out.skip = true;
                    Ok(())
                } else if meta.path.is_ident("object_params") {
                    out.object_params = true;
                    Ok(())
                } else if meta.path.is_ident("rename") {
                    meta.parse_nested_meta(|inner| {
                        let Some(ident) = inner.path.get_ident().cloned() else {
                            return Err(inner.error("expected an argument name"));
                        };
                        let wire: LitStr = inner.value()?.parse()?;
                        out.renames.push((ident, wire));
                        Ok(())
                    })
                } else {
                    Err(meta.error(
                        "unsupported rpc option, expected `name`, `skip`, `object_params` or `rename`",
                    ))
                }
            })?;
        }
        attrs.retain(|attr| !attr.path().is_ident("rpc"));
        Ok(out)
    }

    /// The wire name of argument `ident`.
    pub fn wire_name(&self, ident: &Ident) -> String {
        self.renames
            .iter()
            .find(|(arg, _)| arg == ident)
            .map_or_else(|| ident.to_string(), |(_, wire)| wire.value())
    }
}
