use crate::error::{Error, Result};
use crate::Namespace;

/// A parsed object path: hostname, namespace path, optional class and
/// optional instance keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub hostname: String,
    pub namespace: String,
    pub class_name: String,
    pub keys: Vec<(String, String)>,
}

/// Parse a textual object path into something the session can query.
///
/// Supported schemas:
///
/// ```text
/// cimv2                                    namespace (relative)
/// //./root/cimv2                           namespace
/// //HOSTNAME/root/cimv2                    namespace
/// winmgmts://./root/cimv2                  namespace
/// Win32_Service                            class (relative)
/// //./root/cimv2:Win32_Service             class
/// Win32_Service.Name='Beep'                instance (relative)
/// //./root/cimv2:Win32_Service.Name="Beep" instance
/// ```
///
/// A rooted path of the form `//./root/cimv2/Win32_Service` cannot be
/// told apart from a namespace and is treated as one.
pub fn parse_object_path(
    object_path: &str,
    ns: Option<&Namespace<'_>>,
) -> Result<ObjectPath> {
    let mut object_path = object_path.replace('\\', "/");
    if let Some(rest) = object_path.strip_prefix("winmgmts:") {
        object_path = rest.to_owned();
    }

    let mut hostname = "localhost".to_owned();
    let mut namespace = ns.map(|n| n.name.clone());
    let mut keys = Vec::new();

    let mut is_rooted = false;
    if let Some(rest) = object_path.strip_prefix("//") {
        is_rooted = true;
        let (host, rest) = rest.split_once('/').unwrap_or((rest, ""));
        hostname = if host == "." {
            "localhost".to_owned()
        } else {
            host.to_owned()
        };
        object_path = rest.to_owned();
    }

    let colon_split = object_path
        .split_once(':')
        .map(|(ns_part, rest)| (ns_part.to_owned(), rest.to_owned()));
    if let Some((ns_part, rest)) = colon_split {
        namespace = Some(ns_part);
        object_path = rest;
    } else if !object_path.contains('.') {
        if is_rooted {
            return Ok(ObjectPath {
                hostname,
                namespace: object_path.replace('/', "\\"),
                class_name: String::new(),
                keys,
            });
        }

        let ns = ns.ok_or_else(|| {
            Error::InvalidPath("relative query but no namespace".to_owned())
        })?;
        match ns.namespace(&object_path) {
            Ok(_) => {
                // a nested namespace under the current one
                return Ok(ObjectPath {
                    hostname,
                    namespace: format!(
                        "{}\\{}",
                        ns.name.replace('/', "\\"),
                        object_path.replace('/', "\\")
                    ),
                    class_name: String::new(),
                    keys,
                });
            }
            Err(Error::NotFound(_)) => {
                // not a namespace, must be a class under the current one
                ns.class_(&object_path)?;
                namespace = Some(ns.name.clone());
            }
            Err(err) => return Err(err),
        }
    }

    let dot_split = object_path
        .split_once('.')
        .map(|(class_part, key_list)| (class_part.to_owned(), key_list.to_owned()));
    if let Some((class_part, key_list)) = dot_split {
        object_path = class_part;
        if !key_list.is_empty() {
            for key in key_list.split(',') {
                let (name, value) = key.split_once('=').unwrap_or((key, ""));
                keys.push((
                    name.to_owned(),
                    value.trim_matches(|c| c == '"' || c == '\'').to_owned(),
                ));
            }
        }
    }

    Ok(ObjectPath {
        hostname,
        namespace: namespace.unwrap_or_default().replace('/', "\\"),
        class_name: object_path,
        keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str) -> ObjectPath {
        parse_object_path(path, None).unwrap()
    }

    #[test]
    fn rooted_namespace() {
        let parsed = parse("//./root/cimv2");
        assert_eq!(parsed.hostname, "localhost");
        assert_eq!(parsed.namespace, "root\\cimv2");
        assert!(parsed.class_name.is_empty());
        assert!(parsed.keys.is_empty());
    }

    #[test]
    fn rooted_namespace_with_hostname() {
        let parsed = parse("//HOST/root/cimv2");
        assert_eq!(parsed.hostname, "HOST");
        assert_eq!(parsed.namespace, "root\\cimv2");
    }

    #[test]
    fn winmgmts_prefix_is_stripped() {
        let parsed = parse("winmgmts://./root/cimv2");
        assert_eq!(parsed.hostname, "localhost");
        assert_eq!(parsed.namespace, "root\\cimv2");
    }

    #[test]
    fn rooted_class() {
        let parsed = parse("//./root/cimv2:Win32_Service");
        assert_eq!(parsed.namespace, "root\\cimv2");
        assert_eq!(parsed.class_name, "Win32_Service");
        assert!(parsed.keys.is_empty());
    }

    #[test]
    fn rooted_instance_with_quoted_keys() {
        let parsed = parse("//./root/cimv2:Win32_Service.Name=\"Beep\",Index='2'");
        assert_eq!(parsed.class_name, "Win32_Service");
        assert_eq!(
            parsed.keys,
            vec![
                ("Name".to_owned(), "Beep".to_owned()),
                ("Index".to_owned(), "2".to_owned()),
            ]
        );
    }

    #[test]
    fn backslash_paths_are_normalized() {
        let parsed = parse("//.\\root\\cimv2:Win32_Service");
        assert_eq!(parsed.namespace, "root\\cimv2");
        assert_eq!(parsed.class_name, "Win32_Service");
    }

    #[test]
    fn relative_query_without_namespace_fails() {
        assert!(matches!(
            parse_object_path("cimv2", None),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn relative_instance_keeps_current_namespace() {
        // contains a '.', so no namespace probing happens and no
        // session is needed
        let parsed = parse_object_path("Win32_Service.Name='Beep'", None).unwrap();
        assert_eq!(parsed.class_name, "Win32_Service");
        assert_eq!(parsed.namespace, "");
        assert_eq!(
            parsed.keys,
            vec![("Name".to_owned(), "Beep".to_owned())]
        );
    }
}
