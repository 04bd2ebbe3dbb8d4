use std::path::Path;

/// One resolved source location for an instruction offset. Inlined frames
/// are reported innermost first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
}

/// Maps an instruction offset within a binary to its source call sites.
///
/// Resolution is best effort: an offset the resolver cannot map, a missing
/// binary, or a failed external tool all yield an empty list, never an
/// error. The decode path stays free of process spawning; callers inject
/// whatever resolver backs their debug info.
pub trait SymbolResolver {
    fn call_sites(&self, binary: &Path, offset: u64) -> Vec<CallSite>;
}

impl<F> SymbolResolver for F
where
    F: Fn(&Path, u64) -> Vec<CallSite>,
{
    fn call_sites(&self, binary: &Path, offset: u64) -> Vec<CallSite> {
        self(binary, offset)
    }
}

/// Resolver for traces with no symbol information available.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopResolver;

impl SymbolResolver for NoopResolver {
    fn call_sites(&self, _binary: &Path, _offset: u64) -> Vec<CallSite> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn closures_resolve_innermost_first() {
        let resolver = |binary: &Path, offset: u64| {
            if binary == Path::new("/bin/app") && offset == 0x400 {
                vec![
                    CallSite {
                        file: "inline.h".to_string(),
                        line: 12,
                    },
                    CallSite {
                        file: "main.c".to_string(),
                        line: 57,
                    },
                ]
            } else {
                Vec::new()
            }
        };

        let sites = resolver.call_sites(&PathBuf::from("/bin/app"), 0x400);
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].file, "inline.h");
        assert_eq!(sites[1].line, 57);

        // Unknown offsets resolve to nothing rather than failing
        assert_eq!(resolver.call_sites(&PathBuf::from("/bin/app"), 0x999), vec![]);
    }

    #[test]
    fn noop_resolver_has_no_call_sites() {
        assert_eq!(
            NoopResolver.call_sites(&PathBuf::from("/bin/app"), 0),
            vec![]
        );
    }
}
