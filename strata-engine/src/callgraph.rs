#![forbid(unsafe_code)]

//! Call graph condensation.
//!
//! Functions are grouped into strongly connected components (Tarjan), which
//! are then staged into levels: a component's level is one past the deepest
//! component it calls into. Components on the same level share no call-graph
//! path and can be verified in parallel; levels run in order so callee
//! results are always final before their callers are analyzed. All iteration
//! is over sorted names, so the staging is identical from run to run.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use strata_sym::FunctionSymbolicModel;

/// Sorted, deduplicated call edges into functions the program defines.
fn edges_of(
    model: &FunctionSymbolicModel,
    models: &BTreeMap<String, FunctionSymbolicModel>,
) -> Vec<String> {
    let set: BTreeSet<String> = model
        .call_sites
        .iter()
        .filter(|s| models.contains_key(&s.callee))
        .map(|s| s.callee.clone())
        .collect();
    set.into_iter().collect()
}

/// Strongly connected components in callee-first order.
pub fn components(models: &BTreeMap<String, FunctionSymbolicModel>) -> Vec<Vec<String>> {
    let mut tarjan = Tarjan {
        models,
        index: 0,
        indices: HashMap::new(),
        lowlinks: HashMap::new(),
        on_stack: BTreeSet::new(),
        stack: Vec::new(),
        out: Vec::new(),
    };
    for name in models.keys() {
        if !tarjan.indices.contains_key(name) {
            tarjan.strongconnect(name);
        }
    }
    tarjan.out
}

struct Tarjan<'a> {
    models: &'a BTreeMap<String, FunctionSymbolicModel>,
    index: usize,
    indices: HashMap<String, usize>,
    lowlinks: HashMap<String, usize>,
    on_stack: BTreeSet<String>,
    stack: Vec<String>,
    out: Vec<Vec<String>>,
}

impl<'a> Tarjan<'a> {
    fn strongconnect(&mut self, v: &str) {
        self.indices.insert(v.to_string(), self.index);
        self.lowlinks.insert(v.to_string(), self.index);
        self.index += 1;
        self.stack.push(v.to_string());
        self.on_stack.insert(v.to_string());

        for w in edges_of(&self.models[v], self.models) {
            if !self.indices.contains_key(&w) {
                self.strongconnect(&w);
                let low = self.lowlinks[&w].min(self.lowlinks[v]);
                self.lowlinks.insert(v.to_string(), low);
            } else if self.on_stack.contains(&w) {
                let low = self.indices[&w].min(self.lowlinks[v]);
                self.lowlinks.insert(v.to_string(), low);
            }
        }

        if self.lowlinks[v] == self.indices[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack.remove(&w);
                let done = w == v;
                component.push(w);
                if done {
                    break;
                }
            }
            component.sort();
            self.out.push(component);
        }
    }
}

/// Stage callee-first components into parallelizable levels.
pub fn levels(
    components: &[Vec<String>],
    models: &BTreeMap<String, FunctionSymbolicModel>,
) -> Vec<Vec<Vec<String>>> {
    let mut component_of: HashMap<&str, usize> = HashMap::new();
    for (i, comp) in components.iter().enumerate() {
        for name in comp {
            component_of.insert(name, i);
        }
    }

    let mut level_of: Vec<usize> = vec![0; components.len()];
    for (i, comp) in components.iter().enumerate() {
        let mut level = 0;
        for name in comp {
            for callee in edges_of(&models[name], models) {
                let j = component_of[callee.as_str()];
                if j != i {
                    // Callee components appear earlier in the list.
                    level = level.max(level_of[j] + 1);
                }
            }
        }
        level_of[i] = level;
    }

    let max_level = level_of.iter().copied().max().unwrap_or(0);
    let mut out: Vec<Vec<Vec<String>>> = vec![Vec::new(); max_level + 1];
    for (i, comp) in components.iter().enumerate() {
        out[level_of[i]].push(comp.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ast::build as ast;
    use strata_ast::{Program, Type};
    use strata_sym::{build, BuildLimits};

    fn call_chain_program() -> Program {
        // base <- mid <- top, with side independent of all three.
        let base = ast::function(
            "base",
            vec![ast::param("n", Type::Int)],
            Type::Int,
            ast::var("n", Type::Int),
        );
        let mid = ast::function(
            "mid",
            vec![ast::param("n", Type::Int)],
            Type::Int,
            ast::call("base", vec![ast::var("n", Type::Int)], Type::Int),
        );
        let top = ast::function(
            "top",
            vec![ast::param("n", Type::Int)],
            Type::Int,
            ast::call("mid", vec![ast::var("n", Type::Int)], Type::Int),
        );
        let side = ast::function(
            "side",
            vec![ast::param("n", Type::Int)],
            Type::Int,
            ast::var("n", Type::Int),
        );
        let mut p = Program::new();
        p.functions = vec![base, mid, top, side];
        p
    }

    fn models_of(program: &Program) -> BTreeMap<String, FunctionSymbolicModel> {
        program
            .functions
            .iter()
            .map(|f| {
                (
                    f.name.node.clone(),
                    build(f, program, &BuildLimits::default()),
                )
            })
            .collect()
    }

    #[test]
    fn callees_come_before_callers() {
        let program = call_chain_program();
        let models = models_of(&program);
        let comps = components(&models);
        let pos = |name: &str| {
            comps
                .iter()
                .position(|c| c.iter().any(|n| n == name))
                .unwrap()
        };
        assert!(pos("base") < pos("mid"));
        assert!(pos("mid") < pos("top"));
    }

    #[test]
    fn mutual_recursion_forms_one_component() {
        let ping = ast::function(
            "ping",
            vec![ast::param("n", Type::Int)],
            Type::Int,
            ast::call("pong", vec![ast::var("n", Type::Int)], Type::Int),
        );
        let pong = ast::function(
            "pong",
            vec![ast::param("n", Type::Int)],
            Type::Int,
            ast::call("ping", vec![ast::var("n", Type::Int)], Type::Int),
        );
        let mut p = Program::new();
        p.functions = vec![ping, pong];
        let models = models_of(&p);
        let comps = components(&models);
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0], vec!["ping".to_string(), "pong".to_string()]);
    }

    #[test]
    fn independent_functions_share_a_level() {
        let program = call_chain_program();
        let models = models_of(&program);
        let comps = components(&models);
        let staged = levels(&comps, &models);
        // base and side have no callees: both on level 0.
        assert!(staged[0].iter().any(|c| c == &vec!["base".to_string()]));
        assert!(staged[0].iter().any(|c| c == &vec!["side".to_string()]));
        assert!(staged[1].iter().any(|c| c == &vec!["mid".to_string()]));
        assert!(staged[2].iter().any(|c| c == &vec!["top".to_string()]));
    }
}
