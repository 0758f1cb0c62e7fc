//! Python language plugin (secondary, §4.1): functions, classes, imports at
//! reduced construct coverage relative to TypeScript — no decorators-as-relationships,
//! no re-export resolution beyond plain imports.

use super::plugin::{
    short_hash, symbol_id, ExtractionContext, ExtractionResult, ImportRecord, LanguageId,
    LanguagePlugin, ParseErrorRecord, ParseErrorSeverity, ReferenceCandidate, ReferenceKind,
};
use crate::noise::NoiseFilter;
use memento_storage::domain::{
    ClassDetail, Entity, EntityKind, EvidenceLocation, FunctionDetail, Location, Parameter,
    Relationship, RelationshipType, SymbolDetail, SymbolEntity, Visibility,
};
use tree_sitter::{Language as TSLanguage, Node as TSNode, Tree};

pub struct PythonPlugin {
    noise: NoiseFilter,
}

impl PythonPlugin {
    pub fn new() -> Self {
        Self { noise: NoiseFilter::default() }
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

    fn signature(&self, ctx: &ExtractionContext, node: &TSNode) -> String {
        ctx.node_text(node).lines().next().unwrap_or("").trim().to_string()
    }

    fn is_async(node: &TSNode) -> bool {
        let mut cursor = node.walk();
        node.children(&mut cursor).any(|c| c.kind() == "async")
    }

    fn is_generator(node: &TSNode) -> bool {
        let mut stack = vec![*node];
        while let Some(current) = stack.pop() {
            if current.kind() == "yield" {
                return true;
            }
            // Don't descend into nested function/lambda bodies: their own `yield`
            // makes them generators, not the enclosing one.
            if matches!(current.kind(), "function_definition" | "lambda") && current != *node {
                continue;
            }
            let mut cursor = current.walk();
            for child in current.children(&mut cursor) {
                stack.push(child);
            }
        }
        false
    }

    fn complexity(node: &TSNode) -> u32 {
        let decision_kinds = [
            "if_statement",
            "for_statement",
            "while_statement",
            "case_clause",
            "conditional_expression",
            "boolean_operator",
            "except_clause",
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

    fn docstring(&self, body: &TSNode, ctx: &ExtractionContext) -> Option<String> {
        let mut cursor = body.walk();
        let first_stmt = body.named_children(&mut cursor).next()?;
        if first_stmt.kind() != "expression_statement" {
            return None;
        }
        let expr = first_stmt.named_child(0)?;
        if expr.kind() != "string" {
            return None;
        }
        let text = ctx.node_text(&expr).trim().trim_matches(|c| c == '"' || c == '\'').trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    fn parameters(&self, ctx: &ExtractionContext, node: &TSNode) -> Vec<Parameter> {
        let Some(params_node) = node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut cursor = params_node.walk();
        for child in params_node.children(&mut cursor) {
            match child.kind() {
                "identifier" => {
                    let name = ctx.node_text(&child).to_string();
                    if name == "self" || name == "cls" {
                        continue;
                    }
                    out.push(Parameter { name, r#type: None, optional: false, default_value: None });
                }
                "typed_parameter" => {
                    let name = child.named_child(0).map(|n| ctx.node_text(&n).to_string()).unwrap_or_default();
                    if name == "self" || name == "cls" || name.is_empty() {
                        continue;
                    }
                    let r#type = child.child_by_field_name("type").map(|t| ctx.node_text(&t).to_string());
                    out.push(Parameter { name, r#type, optional: false, default_value: None });
                }
                "default_parameter" | "typed_default_parameter" => {
                    let name_node = child.child_by_field_name("name");
                    let Some(name_node) = name_node else { continue };
                    let name = ctx.node_text(&name_node).to_string();
                    if name == "self" || name == "cls" {
                        continue;
                    }
                    let r#type = child.child_by_field_name("type").map(|t| ctx.node_text(&t).to_string());
                    let default_value = child.child_by_field_name("value").map(|v| ctx.node_text(&v).to_string());
                    out.push(Parameter { name, r#type, optional: true, default_value });
                }
                _ => {}
            }
        }
        out
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
        let return_type = node.child_by_field_name("return_type").map(|t| ctx.node_text(&t).to_string());
        let docstring = node.child_by_field_name("body").and_then(|b| self.docstring(&b, ctx));

        let detail = FunctionDetail {
            parameters: self.parameters(ctx, node),
            return_type: return_type.clone(),
            is_async: Self::is_async(node),
            is_generator: Self::is_generator(node),
            complexity: Self::complexity(node),
        };

        let exported = !name.starts_with('_') || is_method;
        let entity = Entity::new(&id, ctx.file_path, &short_hash(&signature), EntityKind::Symbol(SymbolEntity {
            name: name.clone(),
            signature,
            docstring,
            visibility: if name.starts_with('_') { Visibility::Private } else { Visibility::Public },
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
        if let Some(bases) = node.child_by_field_name("superclasses") {
            let mut cursor = bases.walk();
            for base in bases.named_children(&mut cursor) {
                extends.push(ctx.node_text(&base).to_string());
            }
        }

        let docstring = node.child_by_field_name("body").and_then(|b| self.docstring(&b, ctx));
        let exported = !name.starts_with('_');
        let entity = Entity::new(&id, ctx.file_path, &short_hash(&signature), EntityKind::Symbol(SymbolEntity {
            name: name.clone(),
            signature,
            docstring,
            visibility: if name.starts_with('_') { Visibility::Private } else { Visibility::Public },
            is_exported: exported,
            is_deprecated: false,
            location: Self::location(node),
            detail: SymbolDetail::Class(ClassDetail { extends: extends.clone(), implements: Vec::new(), is_abstract: false }),
        }))
        .with_language(ctx.language.name());
        result.entities.push(entity);

        self.push_structural(ctx, result, parent, &id, exported);

        for target in &extends {
            if target == "object" {
                continue;
            }
            result.candidates.push(ReferenceCandidate {
                from_symbol_id: id.clone(),
                kind: ReferenceKind::Extends,
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

    fn extract_assignment(&self, ctx: &mut ExtractionContext, node: &TSNode, result: &mut ExtractionResult, parent: Option<&str>) {
        let Some(left) = node.child_by_field_name("left") else { return };
        if left.kind() != "identifier" {
            return;
        }
        let name = ctx.node_text(&left).to_string();
        if name.is_empty() || self.noise.is_noise(&name) {
            return;
        }
        let signature = self.signature(ctx, node);
        let id = symbol_id(ctx.file_path, &Self::fqn(ctx, &name), &signature);
        let is_property = !ctx.scope_stack.is_empty();
        let exported = !name.starts_with('_') || is_property;

        let entity = Entity::new(&id, ctx.file_path, &short_hash(&signature), EntityKind::Symbol(SymbolEntity {
            name: name.clone(),
            signature,
            docstring: None,
            visibility: if name.starts_with('_') { Visibility::Private } else { Visibility::Public },
            is_exported: exported,
            is_deprecated: false,
            location: Self::location(&left),
            detail: if is_property { SymbolDetail::Property } else { SymbolDetail::Variable },
        }))
        .with_language(ctx.language.name());
        result.entities.push(entity);

        self.push_structural(ctx, result, parent, &id, exported);

        if let Some(right) = node.child_by_field_name("right") {
            self.dispatch(ctx, &right, result, parent);
        }
    }

    fn extract_import(&self, ctx: &ExtractionContext, node: &TSNode, result: &mut ExtractionResult) {
        let location = self.evidence_location(ctx, node);
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    let (source_module, alias) = match child.kind() {
                        "dotted_name" => (ctx.node_text(&child).to_string(), ctx.node_text(&child).to_string()),
                        "aliased_import" => {
                            let module = child.child_by_field_name("name").map(|n| ctx.node_text(&n).to_string()).unwrap_or_default();
                            let alias = child.child_by_field_name("alias").map(|n| ctx.node_text(&n).to_string()).unwrap_or_else(|| module.clone());
                            (module, alias)
                        }
                        _ => continue,
                    };
                    result.imports.push(ImportRecord {
                        alias,
                        source_module,
                        imported_name: None,
                        is_wildcard: false,
                        location: location.clone(),
                    });
                }
            }
            "import_from_statement" => {
                let module = node.child_by_field_name("module_name").map(|n| ctx.node_text(&n).to_string()).unwrap_or_default();
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    match child.kind() {
                        "wildcard_import" => {
                            result.imports.push(ImportRecord {
                                alias: module.clone(),
                                source_module: module.clone(),
                                imported_name: None,
                                is_wildcard: true,
                                location: location.clone(),
                            });
                        }
                        "dotted_name" | "identifier" => {
                            let name = ctx.node_text(&child).to_string();
                            if name == module {
                                continue;
                            }
                            result.imports.push(ImportRecord {
                                alias: name.clone(),
                                source_module: module.clone(),
                                imported_name: Some(name),
                                is_wildcard: false,
                                location: location.clone(),
                            });
                        }
                        "aliased_import" => {
                            let imported = child.child_by_field_name("name").map(|n| ctx.node_text(&n).to_string());
                            let alias = child.child_by_field_name("alias").map(|n| ctx.node_text(&n).to_string()).or_else(|| imported.clone()).unwrap_or_default();
                            result.imports.push(ImportRecord {
                                alias,
                                source_module: module.clone(),
                                imported_name: imported,
                                is_wildcard: false,
                                location: location.clone(),
                            });
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn extract_call(&self, ctx: &ExtractionContext, node: &TSNode, enclosing: Option<&str>, result: &mut ExtractionResult) {
        let Some(enclosing) = enclosing else { return };
        let Some(callee) = node.child_by_field_name("function") else { return };
        let name = match callee.kind() {
            "identifier" => ctx.node_text(&callee).to_string(),
            "attribute" => callee.child_by_field_name("attribute").map(|a| ctx.node_text(&a).to_string()).unwrap_or_else(|| ctx.node_text(&callee).to_string()),
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
            "function_definition" => {
                let is_method = parent.is_some() && !ctx.scope_stack.is_empty();
                self.extract_function(ctx, node, result, is_method, parent);
            }
            "class_definition" => {
                self.extract_class(ctx, node, result, parent);
            }
            "assignment" => {
                self.extract_assignment(ctx, node, result, parent);
            }
            "import_statement" | "import_from_statement" => {
                self.extract_import(ctx, node, result);
            }
            "call" => {
                self.extract_call(ctx, node, parent, result);
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.dispatch(ctx, &child, result, parent);
                }
            }
            "module" | "block" | "expression_statement" | "decorated_definition" => {
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

impl Default for PythonPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguagePlugin for PythonPlugin {
    fn tree_sitter_language(&self) -> TSLanguage {
        tree_sitter_python::LANGUAGE.into()
    }

    fn language_id(&self) -> LanguageId {
        LanguageId::Python
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

    fn extract_docstring(&self, node: &TSNode, source: &str) -> Option<String> {
        let ctx = ExtractionContext::new(source, "", LanguageId::Python);
        node.child_by_field_name("body").and_then(|b| self.docstring(&b, &ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn parse(source: &str) -> Tree {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into()).unwrap();
        parser.parse(source, None).unwrap()
    }

    #[test]
    fn test_extract_function_definition() {
        let source = "def add(x: int, y: int) -> int:\n    return x + y\n";
        let tree = parse(source);
        let plugin = PythonPlugin::new();
        let mut ctx = ExtractionContext::new(source, "a.py", LanguageId::Python);
        let result = plugin.extract(&mut ctx, &tree);

        assert_eq!(result.entities.len(), 1);
        match &result.entities[0].kind {
            EntityKind::Symbol(s) => assert_eq!(s.name, "add"),
            _ => panic!("expected symbol entity"),
        }
    }

    #[test]
    fn test_extract_class_with_base() {
        let source = "class Dog(Animal):\n    def bark(self):\n        pass\n";
        let tree = parse(source);
        let plugin = PythonPlugin::new();
        let mut ctx = ExtractionContext::new(source, "a.py", LanguageId::Python);
        let result = plugin.extract(&mut ctx, &tree);

        let class = result.entities.iter().find(|e| matches!(&e.kind, EntityKind::Symbol(s) if s.name == "Dog"));
        assert!(class.is_some());
        let extends = result.candidates.iter().find(|c| c.kind == ReferenceKind::Extends);
        assert_eq!(extends.unwrap().target_name, "Animal");

        let method = result.entities.iter().find(|e| matches!(&e.kind, EntityKind::Symbol(s) if s.name == "bark"));
        assert!(matches!(&method.unwrap().kind, EntityKind::Symbol(s) if matches!(s.detail, SymbolDetail::Method(_))));
    }

    #[test]
    fn test_extract_import_from() {
        let source = "from .utils import foo, bar as baz\n";
        let tree = parse(source);
        let plugin = PythonPlugin::new();
        let mut ctx = ExtractionContext::new(source, "a.py", LanguageId::Python);
        let result = plugin.extract(&mut ctx, &tree);

        assert_eq!(result.imports.len(), 2);
        assert_eq!(result.imports[0].source_module, ".utils");
        assert_eq!(result.imports[1].alias, "baz");
    }

    #[test]
    fn test_generator_detection() {
        let source = "def gen():\n    yield 1\n";
        let tree = parse(source);
        let plugin = PythonPlugin::new();
        let mut ctx = ExtractionContext::new(source, "a.py", LanguageId::Python);
        let result = plugin.extract(&mut ctx, &tree);

        match &result.entities[0].kind {
            EntityKind::Symbol(s) => match &s.detail {
                SymbolDetail::Function(f) => assert!(f.is_generator),
                _ => panic!("expected function"),
            },
            _ => panic!("expected symbol"),
        }
    }

    #[test]
    fn test_call_candidate_recorded() {
        let source = "def outer():\n    helper()\n";
        let tree = parse(source);
        let plugin = PythonPlugin::new();
        let mut ctx = ExtractionContext::new(source, "a.py", LanguageId::Python);
        let result = plugin.extract(&mut ctx, &tree);

        let call = result.candidates.iter().find(|c| c.kind == ReferenceKind::Calls);
        assert_eq!(call.unwrap().target_name, "helper");
    }
}
