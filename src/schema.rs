// ABOUTME: Static property schema for the built-in generic functions
// Consumed by evaluator validation and by the completion/hover adapters

use crate::value::ValueKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertySchema {
    pub name: &'static str,
    pub required: bool,
    pub default_description: &'static str,
    pub permitted_kinds: &'static [ValueKind],
    pub documentation: &'static str,
    /// String elements of this property name other targets.
    pub target_reference: bool,
}

impl PropertySchema {
    pub fn permits(&self, kind: ValueKind) -> bool {
        kind == ValueKind::Unknown || self.permitted_kinds.contains(&kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionSchema {
    pub name: &'static str,
    pub documentation_url: &'static str,
    /// Whether the invocation must carry a quoted target name. `Settings`
    /// takes none at all.
    pub target_name: TargetNameRule,
    pub properties: &'static [PropertySchema],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetNameRule {
    Required,
    Forbidden,
}

impl FunctionSchema {
    pub fn property(&self, name: &str) -> Option<&'static PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// The schema entry for `name`, when `name` is a built-in generic function.
pub fn lookup(name: &str) -> Option<&'static FunctionSchema> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

pub fn is_generic_function(name: &str) -> bool {
    lookup(name).is_some()
}

// ============================================================================
// Table data
// ============================================================================

const STRING: &[ValueKind] = &[ValueKind::String];
const INTEGER: &[ValueKind] = &[ValueKind::Integer];
const BOOLEAN: &[ValueKind] = &[ValueKind::Boolean];
const STRINGS: &[ValueKind] = &[ValueKind::ArrayOfStrings];
const STRING_OR_STRINGS: &[ValueKind] = &[ValueKind::String, ValueKind::ArrayOfStrings];

const fn required(
    name: &'static str,
    permitted_kinds: &'static [ValueKind],
    documentation: &'static str,
) -> PropertySchema {
    PropertySchema {
        name,
        required: true,
        default_description: "",
        permitted_kinds,
        documentation,
        target_reference: false,
    }
}

const fn optional(
    name: &'static str,
    permitted_kinds: &'static [ValueKind],
    default_description: &'static str,
    documentation: &'static str,
) -> PropertySchema {
    PropertySchema {
        name,
        required: false,
        default_description,
        permitted_kinds,
        documentation,
        target_reference: false,
    }
}

const fn target_list(
    name: &'static str,
    is_required: bool,
    documentation: &'static str,
) -> PropertySchema {
    PropertySchema {
        name,
        required: is_required,
        default_description: "",
        permitted_kinds: STRING_OR_STRINGS,
        documentation,
        target_reference: true,
    }
}

const PRE_BUILD_DEPENDENCIES: PropertySchema = target_list(
    "PreBuildDependencies",
    false,
    "Targets that must be built before this one.",
);

pub const FUNCTIONS: &[FunctionSchema] = &[
    FunctionSchema {
        name: "Alias",
        documentation_url: "https://www.fastbuild.org/docs/functions/alias.html",
        target_name: TargetNameRule::Required,
        properties: &[
            target_list("Targets", true, "Targets this alias stands for."),
            optional(
                "Hidden",
                BOOLEAN,
                "false",
                "Hide the alias from target listings.",
            ),
        ],
    },
    FunctionSchema {
        name: "Compiler",
        documentation_url: "https://www.fastbuild.org/docs/functions/compiler.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("Executable", STRING, "Path to the compiler executable."),
            optional(
                "ExtraFiles",
                STRINGS,
                "{}",
                "Additional files the compiler needs at runtime (DLLs, config).",
            ),
            optional(
                "CompilerFamily",
                STRING,
                "'auto'",
                "Compiler family override: msvc, clang, gcc, …",
            ),
            optional(
                "AllowDistribution",
                BOOLEAN,
                "true",
                "Whether compilations may be distributed to workers.",
            ),
            optional(
                "Environment",
                STRINGS,
                "{}",
                "Environment variables set when the compiler runs.",
            ),
        ],
    },
    FunctionSchema {
        name: "ObjectList",
        documentation_url: "https://www.fastbuild.org/docs/functions/objectlist.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("Compiler", STRING, "Compiler target or executable to use."),
            required("CompilerOptions", STRING, "Command line passed to the compiler."),
            required(
                "CompilerOutputPath",
                STRING,
                "Directory that receives the compiled objects.",
            ),
            optional(
                "CompilerInputPath",
                STRING_OR_STRINGS,
                "",
                "Directories scanned for input files.",
            ),
            optional(
                "CompilerInputPattern",
                STRING_OR_STRINGS,
                "'*.cpp'",
                "Wildcard pattern selecting input files.",
            ),
            optional(
                "CompilerInputFiles",
                STRING_OR_STRINGS,
                "{}",
                "Explicit list of files to compile.",
            ),
            PRE_BUILD_DEPENDENCIES,
        ],
    },
    FunctionSchema {
        name: "Library",
        documentation_url: "https://www.fastbuild.org/docs/functions/library.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("Compiler", STRING, "Compiler target or executable to use."),
            required("CompilerOptions", STRING, "Command line passed to the compiler."),
            required(
                "CompilerOutputPath",
                STRING,
                "Directory that receives the compiled objects.",
            ),
            required("Librarian", STRING, "Path to the librarian/archiver executable."),
            required("LibrarianOptions", STRING, "Command line passed to the librarian."),
            required("LibrarianOutput", STRING, "Path of the library to produce."),
            optional(
                "CompilerInputPath",
                STRING_OR_STRINGS,
                "",
                "Directories scanned for input files.",
            ),
            optional(
                "CompilerInputFiles",
                STRING_OR_STRINGS,
                "{}",
                "Explicit list of files to compile.",
            ),
            PRE_BUILD_DEPENDENCIES,
        ],
    },
    FunctionSchema {
        name: "Executable",
        documentation_url: "https://www.fastbuild.org/docs/functions/executable.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("Linker", STRING, "Path to the linker executable."),
            required("LinkerOptions", STRING, "Command line passed to the linker."),
            required("LinkerOutput", STRING, "Path of the binary to produce."),
            target_list("Libraries", true, "Library targets linked into the binary."),
            PRE_BUILD_DEPENDENCIES,
        ],
    },
    FunctionSchema {
        name: "DLL",
        documentation_url: "https://www.fastbuild.org/docs/functions/dll.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("Linker", STRING, "Path to the linker executable."),
            required("LinkerOptions", STRING, "Command line passed to the linker."),
            required("LinkerOutput", STRING, "Path of the shared library to produce."),
            target_list("Libraries", true, "Library targets linked into the shared library."),
            PRE_BUILD_DEPENDENCIES,
        ],
    },
    FunctionSchema {
        name: "Exec",
        documentation_url: "https://www.fastbuild.org/docs/functions/exec.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("ExecExecutable", STRING, "Executable to run."),
            required("ExecOutput", STRING, "Output file the execution produces."),
            optional(
                "ExecInput",
                STRING_OR_STRINGS,
                "{}",
                "Input files passed to the executable.",
            ),
            optional("ExecArguments", STRING, "''", "Arguments passed to the executable."),
            optional("ExecWorkingDir", STRING, "''", "Working directory for the execution."),
            optional(
                "ExecAlways",
                BOOLEAN,
                "false",
                "Run on every build instead of only when inputs change.",
            ),
            PRE_BUILD_DEPENDENCIES,
        ],
    },
    FunctionSchema {
        name: "Copy",
        documentation_url: "https://www.fastbuild.org/docs/functions/copy.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("Source", STRING_OR_STRINGS, "File(s) to copy."),
            required("Dest", STRING, "Destination path."),
            PRE_BUILD_DEPENDENCIES,
        ],
    },
    FunctionSchema {
        name: "CopyDir",
        documentation_url: "https://www.fastbuild.org/docs/functions/copydir.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("SourcePaths", STRING_OR_STRINGS, "Directories to copy from."),
            required("Dest", STRING, "Destination directory."),
            optional(
                "SourcePathsPattern",
                STRING_OR_STRINGS,
                "'*'",
                "Wildcard pattern selecting files to copy.",
            ),
            optional(
                "SourcePathsRecurse",
                BOOLEAN,
                "true",
                "Whether to recurse into subdirectories.",
            ),
            PRE_BUILD_DEPENDENCIES,
        ],
    },
    FunctionSchema {
        name: "RemoveDir",
        documentation_url: "https://www.fastbuild.org/docs/functions/removedir.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("RemovePaths", STRING_OR_STRINGS, "Directories to delete files from."),
            optional(
                "RemovePathsRecurse",
                BOOLEAN,
                "true",
                "Whether to recurse into subdirectories.",
            ),
        ],
    },
    FunctionSchema {
        name: "Test",
        documentation_url: "https://www.fastbuild.org/docs/functions/test.html",
        target_name: TargetNameRule::Required,
        properties: &[
            target_list("TestExecutable", true, "Executable target (or path) to run."),
            required("TestOutput", STRING, "File that captures the test output."),
            optional("TestArguments", STRING, "''", "Arguments passed to the test."),
            optional("TestWorkingDir", STRING, "''", "Working directory for the test."),
            optional(
                "TestTimeOut",
                INTEGER,
                "0",
                "Seconds before the test is killed; 0 disables the timeout.",
            ),
            PRE_BUILD_DEPENDENCIES,
        ],
    },
    FunctionSchema {
        name: "Unity",
        documentation_url: "https://www.fastbuild.org/docs/functions/unity.html",
        target_name: TargetNameRule::Required,
        properties: &[
            required("UnityOutputPath", STRING, "Directory that receives the unity files."),
            optional(
                "UnityInputPath",
                STRING_OR_STRINGS,
                "",
                "Directories scanned for files to merge.",
            ),
            optional(
                "UnityInputPattern",
                STRING_OR_STRINGS,
                "'*.cpp'",
                "Wildcard pattern selecting input files.",
            ),
            optional(
                "UnityInputFiles",
                STRING_OR_STRINGS,
                "{}",
                "Explicit list of files to merge.",
            ),
            optional(
                "UnityNumFiles",
                INTEGER,
                "1",
                "Number of unity files to generate.",
            ),
            PRE_BUILD_DEPENDENCIES,
        ],
    },
    FunctionSchema {
        name: "Settings",
        documentation_url: "https://www.fastbuild.org/docs/functions/settings.html",
        target_name: TargetNameRule::Forbidden,
        properties: &[
            optional("CachePath", STRING, "''", "Directory used for the object cache."),
            optional("Workers", STRINGS, "{}", "Remote worker addresses."),
            optional(
                "Environment",
                STRINGS,
                "{}",
                "Environment variables for spawned processes.",
            ),
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        assert!(lookup("Alias").is_some());
        assert!(lookup("Compiler").is_some());
        assert!(lookup("NotAFunction").is_none());
        assert!(!is_generic_function("Using"));
        assert!(!is_generic_function("Print"));
    }

    #[test]
    fn test_alias_schema_order() {
        let alias = lookup("Alias").unwrap();
        let names: Vec<_> = alias.properties.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Targets", "Hidden"]);
        assert!(alias.property("Targets").unwrap().required);
        assert!(alias.property("Targets").unwrap().target_reference);
        assert!(!alias.property("Hidden").unwrap().required);
    }

    #[test]
    fn test_property_kind_permission() {
        let targets = lookup("Alias").unwrap().property("Targets").unwrap();
        assert!(targets.permits(ValueKind::ArrayOfStrings));
        assert!(targets.permits(ValueKind::String));
        assert!(targets.permits(ValueKind::Unknown));
        assert!(!targets.permits(ValueKind::Integer));
    }

    #[test]
    fn test_settings_takes_no_target_name() {
        assert_eq!(lookup("Settings").unwrap().target_name, TargetNameRule::Forbidden);
        assert_eq!(lookup("Alias").unwrap().target_name, TargetNameRule::Required);
    }

    #[test]
    fn test_every_function_has_documentation_url() {
        for function in FUNCTIONS {
            assert!(
                function.documentation_url.starts_with("https://"),
                "{} lacks a documentation url",
                function.name
            );
        }
    }

    #[test]
    fn test_pre_build_dependencies_is_target_reference() {
        let object_list = lookup("ObjectList").unwrap();
        assert!(object_list
            .property("PreBuildDependencies")
            .unwrap()
            .target_reference);
    }
}
