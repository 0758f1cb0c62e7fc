//! TypeScript/JavaScript language plugin (primary, §4.1).
//!
//! Walks the tree-sitter TypeScript/TSX grammar, emitting `Symbol` entities for
//! functions, classes, interfaces, type aliases, methods, and top-level
//! variables; `DEFINES`/`EXPORTS`/`CONTAINS` relationships for the structural
//! skeleton; and [`ReferenceCandidate`]s for everything the Relationship
//! Builder (C4) resolves across files (calls, heritage, type references).

use super::plugin::{
    short_hash, symbol_id, ExtractionContext, ExtractionResult, ImportRecord, LanguageId,
    LanguagePlugin, ParseErrorRecord, ParseErrorSeverity, ReferenceCandidate, ReferenceKind,
};
use crate::noise::NoiseFilter;
use memento_storage::domain::{
    ClassDetail, Entity, EntityKind, EvidenceLocation, FunctionDetail, InterfaceDetail, Location,
    Parameter, Relationship, RelationshipType, SymbolDetail, SymbolEntity, TypeAliasDetail,
    Visibility,
};
use tree_sitter::{Language as TSLanguage, Node as TSNode, Tree};

pub struct TypeScriptPlugin {
    javascript: bool,
    noise: NoiseFilter,
}

impl TypeScriptPlugin {
    pub fn new() -> Self {
        Self { javascript: false, noise: NoiseFilter::default() }
    }

    pub fn javascript() -> Self {
        Self { javascript: true, noise: NoiseFilter::default() }
    }

    fn location(node: &TSNode) -> Location {
        Location {
            line: node.start_position().row as u32 + 1,
            column: node.start_position().column as u32,
            start: node.start_byte() as u32,
            end: node.end_byte() as u32,
        }
    }

    fn evidence_location(&self, ctx: &ExtractionContext, node: &TSNode) -> EvidenceLocation {
        EvidenceLocation {
            path: ctx.file_path.to_string(),
            line: node.start_position().row as u32 + 1,
            column: node.start_position().column as u32,
        }
    }

    fn fqn(ctx: &ExtractionContext, name: &str) -> String {
        if ctx.fqn_prefix().is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", ctx.fqn_prefix(), name)
        }
    }

    fn is_exported(node: &TSNode) -> bool {
        node.parent().map(|p| p.kind() == "export_statement").unwrap_or(false)
    }

    fn is_async(node: &TSNode) -> bool {
        let mut cursor = node.walk();
        node.children(&mut cursor).any(|c| c.kind() == "async")
    }

    fn complexity(node: &TSNode) -> u32 {
        // Decision points + 1 (§4.1: if/for/while/case/ternary/logical-or/logical-and).
        let decision_kinds = [
            "if_statement",
            "for_statement",
            "for_in_statement",
            "while_statement",
            "do_statement",
            "switch_case",
            "ternary_expression",
            "&&",
            "||",
            "catch_clause",
        ];
        let mut count: u32 = 1;
        let mut cursor = node.walk();
        let mut stack = vec![*node];
        while let Some(current) = stack.pop() {
            if decision_kinds.contains(&current.kind()) {
                count += 1;
            }
            for child in current.children(&mut cursor) {
                stack.push(child);
            }
        }
        count
    }

    fn parameters(&self, ctx: &ExtractionContext, node: &TSNode) -> Vec<Parameter> {
        let Some(params_node) = node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut cursor = params_node.walk();
        for child in params_node.children(&mut cursor) {
            match child.kind() {
                "required_parameter" | "optional_parameter" | "identifier" => {
                    let pattern = child.child_by_field_name("pattern").unwrap_or(child);
                    let name = ctx.node_text(&pattern).to_string();
                    if name.is_empty() {
                        continue;
                    }
                    let r#type = child
                        .child_by_field_name("type")
                        .map(|t| ctx.node_text(&t).trim_start_matches(':').trim().to_string());
                    let default_value = child.child_by_field_name("value").map(|v| ctx.node_text(&v).to_string());
                    out.push(Parameter {
                        name,
                        r#type,
                        optional: child.kind() == "optional_parameter",
                        default_value,
                    });
                }
                _ => {}
            }
        }
        out
    }

    fn signature(&self, ctx: &ExtractionContext, node: &TSNode) -> String {
        ctx.node_text(node).lines().next().unwrap_or("").trim().to_string()
    }

    fn extract_function(
        &self,
        ctx: &mut ExtractionContext,
        node: &TSNode,
        result: &mut ExtractionResult,
        is_method: bool,
        parent: Option<&str>,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else { return };
        let name = ctx.node_text(&name_node).to_string();
        if name.is_empty() || self.noise.is_noise(&name) {
            return;
        }

        let signature = self.signature(ctx, node);
        let id = symbol_id(ctx.file_path, &Self::fqn(ctx, &name), &signature);
        let return_type = node
            .child_by_field_name("return_type")
            .map(|t| ctx.node_text(&t).trim_start_matches(':').trim().to_string());

        let detail = FunctionDetail {
            parameters: self.parameters(ctx, node),
            return_type: return_type.clone(),
            is_async: Self::is_async(node),
            is_generator: ctx.node_text(node).contains('*') && node.child_by_field_name("name").is_some(),
            complexity: Self::complexity(node),
        };

        let exported = Self::is_exported(node) || is_method;
        let entity = Entity::new(&id, ctx.file_path, &short_hash(&signature), EntityKind::Symbol(SymbolEntity {
            name: name.clone(),
            signature,
            docstring: None,
            visibility: Visibility::Public,
            is_exported: exported,
            is_deprecated: false,
            location: Self::location(node),
            detail: if is_method { SymbolDetail::Method(detail) } else { SymbolDetail::Function(detail) },
        }))
        .with_language(ctx.language.name());
        result.entities.push(entity);

        self.push_structural(ctx, result, parent, &id, exported);

        if let Some(rt) = return_type {
            result.candidates.push(ReferenceCandidate {
                from_symbol_id: id.clone(),
                kind: ReferenceKind::ReturnsType,
                target_name: rt,
                location: self.evidence_location(ctx, node),
            });
        }

        ctx.push_scope(&name);
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_body(ctx, &body, result, Some(id));
        }
        ctx.pop_scope();
    }

    fn extract_class(&self, ctx: &mut ExtractionContext, node: &TSNode, result: &mut ExtractionResult, parent: Option<&str>) {
        let Some(name_node) = node.child_by_field_name("name") else { return };
        let name = ctx.node_text(&name_node).to_string();
        if name.is_empty() {
            return;
        }

        let signature = self.signature(ctx, node);
        let id = symbol_id(ctx.file_path, &Self::fqn(ctx, &name), &signature);

        let mut extends = Vec::new();
        let mut implements = Vec::new();
        if let Some(heritage) = find_child_by_kind(node, "class_heritage") {
            let mut cursor = heritage.walk();
            for clause in heritage.children(&mut cursor) {
                match clause.kind() {
                    "extends_clause" => {
                        if let Some(value) = clause.child_by_field_name("value").or_else(|| clause.named_child(0)) {
                            extends.push(ctx.node_text(&value).to_string());
                        }
                    }
                    "implements_clause" => {
                        let mut tc = clause.walk();
                        for t in clause.named_children(&mut tc) {
                            implements.push(ctx.node_text(&t).to_string());
                        }
                    }
                    _ => {}
                }
            }
        }

        let exported = Self::is_exported(node);
        let entity = Entity::new(&id, ctx.file_path, &short_hash(&signature), EntityKind::Symbol(SymbolEntity {
            name: name.clone(),
            signature,
            docstring: None,
            visibility: Visibility::Public,
            is_exported: exported,
            is_deprecated: false,
            location: Self::location(node),
            detail: SymbolDetail::Class(ClassDetail {
                extends: extends.clone(),
                implements: implements.clone(),
                is_abstract: ctx.node_text(node).trim_start().starts_with("abstract"),
            }),
        }))
        .with_language(ctx.language.name());
        result.entities.push(entity);

        self.push_structural(ctx, result, parent, &id, exported);

        for target in &extends {
            result.candidates.push(ReferenceCandidate {
                from_symbol_id: id.clone(),
                kind: ReferenceKind::Extends,
                target_name: target.clone(),
                location: self.evidence_location(ctx, node),
            });
        }
        for target in &implements {
            result.candidates.push(ReferenceCandidate {
                from_symbol_id: id.clone(),
                kind: ReferenceKind::Implements,
                target_name: target.clone(),
                location: self.evidence_location(ctx, node),
            });
        }

        ctx.push_scope(&name);
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_body(ctx, &body, result, Some(id));
        }
        ctx.pop_scope();
    }

    fn extract_interface(&self, ctx: &mut ExtractionContext, node: &TSNode, result: &mut ExtractionResult, parent: Option<&str>) {
        let Some(name_node) = node.child_by_field_name("name") else { return };
        let name = ctx.node_text(&name_node).to_string();
        if name.is_empty() {
            return;
        }
        let signature = self.signature(ctx, node);
        let id = symbol_id(ctx.file_path, &Self::fqn(ctx, &name), &signature);

        let mut extends = Vec::new();
        if let Some(clause) = find_child_by_kind(node, "extends_type_clause") {
            let mut cursor = clause.walk();
            for t in clause.named_children(&mut cursor) {
                extends.push(ctx.node_text(&t).to_string());
            }
        }

        let exported = Self::is_exported(node);
        let entity = Entity::new(&id, ctx.file_path, &short_hash(&signature), EntityKind::Symbol(SymbolEntity {
            name: name.clone(),
            signature,
            docstring: None,
            visibility: Visibility::Public,
            is_exported: exported,
            is_deprecated: false,
            location: Self::location(node),
            detail: SymbolDetail::Interface(InterfaceDetail { extends: extends.clone() }),
        }))
        .with_language(ctx.language.name());
        result.entities.push(entity);

        self.push_structural(ctx, result, parent, &id, exported);

        for target in extends {
            result.candidates.push(ReferenceCandidate {
                from_symbol_id: id.clone(),
                kind: ReferenceKind::Extends,
                target_name: target,
                location: self.evidence_location(ctx, node),
            });
        }
    }

    fn extract_type_alias(&self, ctx: &mut ExtractionContext, node: &TSNode, result: &mut ExtractionResult, parent: Option<&str>) {
        let Some(name_node) = node.child_by_field_name("name") else { return };
        let name = ctx.node_text(&name_node).to_string();
        if name.is_empty() {
            return;
        }
        let signature = self.signature(ctx, node);
        let id = symbol_id(ctx.file_path, &Self::fqn(ctx, &name), &signature);
        let aliased = node.child_by_field_name("value").map(|v| ctx.node_text(&v).to_string()).unwrap_or_default();

        let exported = Self::is_exported(node);
        let entity = Entity::new(&id, ctx.file_path, &short_hash(&signature), EntityKind::Symbol(SymbolEntity {
            name: name.clone(),
            signature,
            docstring: None,
            visibility: Visibility::Public,
            is_exported: exported,
            is_deprecated: false,
            location: Self::location(node),
            detail: SymbolDetail::TypeAlias(TypeAliasDetail {
                is_union: aliased.contains('|'),
                is_intersection: aliased.contains('&'),
                aliased_type: aliased,
            }),
        }))
        .with_language(ctx.language.name());
        result.entities.push(entity);

        self.push_structural(ctx, result, parent, &id, exported);
    }

    fn extract_variable(&self, ctx: &mut ExtractionContext, node: &TSNode, result: &mut ExtractionResult, is_property: bool, parent: Option<&str>) {
        let name_node = node
            .child_by_field_name("name")
            .or_else(|| node.child_by_field_name("property"));
        let Some(name_node) = name_node else { return };
        let name = ctx.node_text(&name_node).to_string();
        if name.is_empty() || self.noise.is_noise(&name) {
            return;
        }
        let signature = self.signature(ctx, node);
        let id = symbol_id(ctx.file_path, &Self::fqn(ctx, &name), &signature);
        let exported = Self::is_exported(node) || is_property;

        let entity = Entity::new(&id, ctx.file_path, &short_hash(&signature), EntityKind::Symbol(SymbolEntity {
            name: name.clone(),
            signature,
            docstring: None,
            visibility: Visibility::Public,
            is_exported: exported,
            is_deprecated: false,
            location: Self::location(node),
            detail: if is_property { SymbolDetail::Property } else { SymbolDetail::Variable },
        }))
        .with_language(ctx.language.name());
        result.entities.push(entity);

        self.push_structural(ctx, result, parent, &id, exported);
    }

    fn extract_import(&self, ctx: &ExtractionContext, node: &TSNode, result: &mut ExtractionResult) {
        let Some(source_node) = node.child_by_field_name("source") else { return };
        let source_module = ctx.node_text(&source_node).trim_matches(|c| c == '"' || c == '\'').to_string();
        let location = self.evidence_location(ctx, node);

        if let Some(clause) = find_child_by_kind(node, "import_clause") {
            let mut cursor = clause.walk();
            for child in clause.children(&mut cursor) {
                match child.kind() {
                    "identifier" => {
                        result.imports.push(ImportRecord {
                            alias: ctx.node_text(&child).to_string(),
                            source_module: source_module.clone(),
                            imported_name: None,
                            is_wildcard: false,
                            location: location.clone(),
                        });
                    }
                    "namespace_import" => {
                        if let Some(alias_node) = child.named_child(0) {
                            result.imports.push(ImportRecord {
                                alias: ctx.node_text(&alias_node).to_string(),
                                source_module: source_module.clone(),
                                imported_name: None,
                                is_wildcard: true,
                                location: location.clone(),
                            });
                        }
                    }
                    "named_imports" => {
                        let mut ic = child.walk();
                        for spec in child.named_children(&mut ic) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let imported = spec.child_by_field_name("name").map(|n| ctx.node_text(&n).to_string());
                            let alias = spec
                                .child_by_field_name("alias")
                                .map(|n| ctx.node_text(&n).to_string())
                                .or_else(|| imported.clone())
                                .unwrap_or_default();
                            result.imports.push(ImportRecord {
                                alias,
                                source_module: source_module.clone(),
                                imported_name: imported,
                                is_wildcard: false,
                                location: location.clone(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn extract_call(&self, ctx: &ExtractionContext, node: &TSNode, enclosing: Option<&str>, result: &mut ExtractionResult) {
        let Some(enclosing) = enclosing else { return };
        let Some(callee) = node.child_by_field_name("function") else { return };
        let name = match callee.kind() {
            "identifier" => ctx.node_text(&callee).to_string(),
            "member_expression" => callee
                .child_by_field_name("property")
                .map(|p| ctx.node_text(&p).to_string())
                .unwrap_or_else(|| ctx.node_text(&callee).to_string()),
            _ => ctx.node_text(&callee).to_string(),
        };
        if name.is_empty() || self.noise.is_noise(&name) {
            return;
        }
        result.candidates.push(ReferenceCandidate {
            from_symbol_id: enclosing.to_string(),
            kind: ReferenceKind::Calls,
            target_name: name,
            location: self.evidence_location(ctx, node),
        });
    }

    /// `parent` is the enclosing symbol's id, when this construct is nested inside
    /// one (a method inside a class, a variable inside a function); `None` for
    /// top-level constructs, which attach directly to the file.
    fn push_structural(&self, ctx: &ExtractionContext, result: &mut ExtractionResult, parent: Option<&str>, id: &str, exported: bool) {
        let file_id = super::plugin::file_id(ctx.file_path);
        match parent {
            Some(parent_id) => {
                result.relationships.push(structural_relationship(parent_id, id, RelationshipType::Contains));
            }
            None => {
                result.relationships.push(structural_relationship(&file_id, id, RelationshipType::Defines));
                if exported {
                    result.relationships.push(structural_relationship(&file_id, id, RelationshipType::Exports));
                }
            }
        }
    }

    fn walk_body(&self, ctx: &mut ExtractionContext, node: &TSNode, result: &mut ExtractionResult, parent: Option<String>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.dispatch(ctx, &child, result, parent.as_deref());
        }
    }

    fn dispatch(&self, ctx: &mut ExtractionContext, node: &TSNode, result: &mut ExtractionResult, parent: Option<&str>) {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                self.extract_function(ctx, node, result, false, parent);
            }
            "method_definition" => {
                self.extract_function(ctx, node, result, true, parent);
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.extract_class(ctx, node, result, parent);
            }
            "interface_declaration" => {
                self.extract_interface(ctx, node, result, parent);
            }
            "type_alias_declaration" => {
                self.extract_type_alias(ctx, node, result, parent);
            }
            "public_field_definition" => {
                self.extract_variable(ctx, node, result, true, parent);
            }
            "lexical_declaration" | "variable_declaration" => {
                let mut cursor = node.walk();
                for decl in node.named_children(&mut cursor) {
                    if decl.kind() == "variable_declarator" {
                        self.extract_variable(ctx, &decl, result, false, parent);
                    }
                }
            }
            "import_statement" => {
                self.extract_import(ctx, node, result);
            }
            "export_statement" => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.dispatch(ctx, &child, result, parent);
                }
            }
            "call_expression" => {
                self.extract_call(ctx, node, parent, result);
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.dispatch(ctx, &child, result, parent);
                }
            }
            "program" | "statement_block" | "class_body" | "export_clause" => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.dispatch(ctx, &child, result, parent);
                }
            }
            _ => {
                if node.child_count() > 0 {
                    let mut cursor = node.walk();
                    for child in node.named_children(&mut cursor) {
                        self.dispatch(ctx, &child, result, parent);
                    }
                }
            }
        }
    }
}

fn find_child_by_kind<'a>(node: &TSNode<'a>, kind: &str) -> Option<TSNode<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|c| c.kind() == kind)
}

fn structural_relationship(from: &str, to: &str, rel_type: RelationshipType) -> Relationship {
    let now = chrono::Utc::now();
    let target_key = Relationship::target_key(Some(to), None);
    Relationship {
        id: memento_storage::domain::canonical_id(from, rel_type, &target_key),
        from_entity_id: from.to_string(),
        to_entity_id: Some(to.to_string()),
        to_ref: None,
        r#type: rel_type,
        created: now,
        last_modified: now,
        version: 1,
        valid_from: now,
        valid_to: None,
        active: true,
        confidence: Some(1.0),
        evidence: vec![],
        locations: vec![],
        metadata: serde_json::Value::Null,
        occurrences: 1,
        last_seen_at: now,
    }
}

impl Default for TypeScriptPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguagePlugin for TypeScriptPlugin {
    fn tree_sitter_language(&self) -> TSLanguage {
        if self.javascript {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        }
    }

    fn language_id(&self) -> LanguageId {
        if self.javascript { LanguageId::JavaScript } else { LanguageId::TypeScript }
    }

    fn extract(&self, ctx: &mut ExtractionContext, tree: &Tree) -> ExtractionResult {
        let mut result = ExtractionResult::new();
        let root = tree.root_node();
        if root.has_error() {
            result.errors.push(ParseErrorRecord {
                file: ctx.file_path.to_string(),
                line: 1,
                column: 0,
                message: "syntax error recovered by tree-sitter error nodes".to_string(),
                severity: ParseErrorSeverity::Warning,
            });
        }
        self.walk_body(ctx, &root, &mut result, None);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn parse(source: &str) -> Tree {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()).unwrap();
        parser.parse(source, None).unwrap()
    }

    #[test]
    fn test_extract_function_declaration() {
        let source = "export function add(x: number, y: number): number { return x + y; }";
        let tree = parse(source);
        let plugin = TypeScriptPlugin::new();
        let mut ctx = ExtractionContext::new(source, "a.ts", LanguageId::TypeScript);
        let result = plugin.extract(&mut ctx, &tree);

        assert_eq!(result.entities.len(), 1);
        match &result.entities[0].kind {
            EntityKind::Symbol(s) => {
                assert_eq!(s.name, "add");
                assert!(s.is_exported);
            }
            _ => panic!("expected symbol entity"),
        }
    }

    #[test]
    fn test_extract_class_with_heritage() {
        let source = "class Dog extends Animal implements Pet { bark() {} }";
        let tree = parse(source);
        let plugin = TypeScriptPlugin::new();
        let mut ctx = ExtractionContext::new(source, "a.ts", LanguageId::TypeScript);
        let result = plugin.extract(&mut ctx, &tree);

        let class = result.entities.iter().find(|e| matches!(&e.kind, EntityKind::Symbol(s) if s.name == "Dog"));
        assert!(class.is_some());

        let extends = result.candidates.iter().find(|c| c.kind == ReferenceKind::Extends);
        assert!(extends.is_some());
        assert_eq!(extends.unwrap().target_name, "Animal");
    }

    #[test]
    fn test_extract_import_named() {
        let source = "import { foo, bar as baz } from './utils';";
        let tree = parse(source);
        let plugin = TypeScriptPlugin::new();
        let mut ctx = ExtractionContext::new(source, "a.ts", LanguageId::TypeScript);
        let result = plugin.extract(&mut ctx, &tree);

        assert_eq!(result.imports.len(), 2);
        assert_eq!(result.imports[0].source_module, "./utils");
        assert_eq!(result.imports[1].alias, "baz");
    }

    #[test]
    fn test_call_candidate_recorded() {
        let source = "function outer() { helper(); }";
        let tree = parse(source);
        let plugin = TypeScriptPlugin::new();
        let mut ctx = ExtractionContext::new(source, "a.ts", LanguageId::TypeScript);
        let result = plugin.extract(&mut ctx, &tree);

        let call = result.candidates.iter().find(|c| c.kind == ReferenceKind::Calls);
        assert!(call.is_some());
        assert_eq!(call.unwrap().target_name, "helper");
    }
}
