//! Source rendering.
//!
//! Expressions are printed fully parenthesized so operator precedence never
//! changes the meaning of generated code, except for leaf expressions and
//! call/index forms which are unambiguous.

use std::fmt::Write;

use crate::ast::{
    AddrSpace, Expr, Kernel, KernelAttribute, KernelParam, Module, Stmt, Type,
};

fn addr_space_prefix(space: AddrSpace) -> &'static str {
    match space {
        AddrSpace::Private => "",
        AddrSpace::Global => "__global ",
        AddrSpace::Local => "__local ",
    }
}

/// Render a type.
pub fn print_type(ty: &Type) -> String {
    match ty {
        Type::Scalar(s) => s.name().to_string(),
        Type::Pointer { elem, space } => {
            format!("{}{}*", addr_space_prefix(*space), elem.name())
        }
    }
}

fn float_lit(v: f64) -> String {
    if v.is_nan() {
        return "NAN".into();
    }
    if v.is_infinite() {
        return if v < 0.0 { "-INFINITY" } else { "INFINITY" }.into();
    }
    // The shortest round-trip decimal is a valid C literal; bare integers
    // get a trailing `.0` so the literal stays floating point.
    let mut s = format!("{v}");
    if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

/// Render an expression.
pub fn print_expr(e: &Expr) -> String {
    match e {
        Expr::Var(n) => n.clone(),
        Expr::Int(v) => format!("{v}"),
        Expr::Uint(v) => format!("{v}u"),
        Expr::Float(v) => float_lit(*v),
        Expr::FloatSingle(v) => format!("{}f", float_lit(*v)),
        Expr::Binary(op, a, b) => {
            format!("({} {} {})", print_expr(a), op.symbol(), print_expr(b))
        }
        Expr::Unary(op, a) => format!("({}{})", op.symbol(), print_expr(a)),
        Expr::Ternary(c, a, b) => format!(
            "({} ? {} : {})",
            print_expr(c),
            print_expr(a),
            print_expr(b)
        ),
        Expr::Call(name, args) => {
            let args: Vec<String> = args.iter().map(print_expr).collect();
            format!("{name}({})", args.join(", "))
        }
        Expr::Cast(ty, a) => format!("(({}) {})", print_type(ty), print_expr(a)),
        Expr::Index(base, idx) => format!("{}[{}]", print_expr(base), print_expr(idx)),
        Expr::Vector(scalar, parts) => {
            let parts: Vec<String> = parts.iter().map(print_expr).collect();
            format!("({})({})", scalar.name(), parts.join(", "))
        }
        Expr::Member(base, member) => format!("{}.{member}", print_expr(base)),
    }
}

fn print_stmt(out: &mut String, stmt: &Stmt, level: usize) {
    let pad = "    ".repeat(level);
    match stmt {
        Stmt::VarDecl {
            space,
            ty,
            name,
            array,
            init,
        } => {
            let _ = write!(out, "{pad}{}{} {name}", addr_space_prefix(*space), print_type(ty));
            if let Some(n) = array {
                let _ = write!(out, "[{n}]");
            }
            if let Some(init) = init {
                let _ = write!(out, " = {}", print_expr(init));
            }
            out.push_str(";\n");
        }
        Stmt::Assign { lhs, rhs } => {
            let _ = writeln!(out, "{pad}{} = {};", print_expr(lhs), print_expr(rhs));
        }
        Stmt::Expr(e) => {
            let _ = writeln!(out, "{pad}{};", print_expr(e));
        }
        Stmt::For {
            ty,
            var,
            init,
            cond,
            step,
            body,
        } => {
            let _ = writeln!(
                out,
                "{pad}for ({} {var} = {}; {var} < {}; {var} += {}) {{",
                print_type(ty),
                print_expr(init),
                print_expr(cond),
                print_expr(step)
            );
            for s in body {
                print_stmt(out, s, level + 1);
            }
            let _ = writeln!(out, "{pad}}}");
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let _ = writeln!(out, "{pad}if ({}) {{", print_expr(cond));
            for s in then_branch {
                print_stmt(out, s, level + 1);
            }
            if else_branch.is_empty() {
                let _ = writeln!(out, "{pad}}}");
            } else {
                let _ = writeln!(out, "{pad}}} else {{");
                for s in else_branch {
                    print_stmt(out, s, level + 1);
                }
                let _ = writeln!(out, "{pad}}}");
            }
        }
        Stmt::Block(body) => {
            let _ = writeln!(out, "{pad}{{");
            for s in body {
                print_stmt(out, s, level + 1);
            }
            let _ = writeln!(out, "{pad}}}");
        }
    }
}

fn print_param(p: &KernelParam) -> String {
    if p.pointer_to_pointer {
        match &p.ty {
            Type::Pointer { elem, space } => format!(
                "{}{}* const* {}",
                addr_space_prefix(*space),
                elem.name(),
                p.name
            ),
            Type::Scalar(s) => format!("{}* const* {}", s.name(), p.name),
        }
    } else {
        format!("{} {}", print_type(&p.ty), p.name)
    }
}

/// Render one kernel.
pub fn print_kernel(k: &Kernel) -> String {
    let mut out = String::new();
    for attr in &k.attributes {
        match attr {
            KernelAttribute::ReqdWorkGroupSize(x, y, z) => {
                let _ = writeln!(out, "__attribute__((reqd_work_group_size({x}, {y}, {z})))");
            }
            KernelAttribute::IntelReqdSubGroupSize(n) => {
                let _ = writeln!(out, "__attribute__((intel_reqd_sub_group_size({n})))");
            }
        }
    }
    let params: Vec<String> = k.params.iter().map(print_param).collect();
    let _ = writeln!(out, "kernel void {}({}) {{", k.name, params.join(", "));
    for s in &k.body {
        print_stmt(&mut out, s, 1);
    }
    out.push_str("}\n");
    out
}

/// Render a module.
pub fn print_module(m: &Module) -> String {
    let mut out = String::new();
    for (i, k) in m.kernels.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&print_kernel(k));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Scalar};
    use pretty_assertions::assert_eq;

    #[test]
    fn expressions_are_parenthesized() {
        let e = Expr::bin(
            BinOp::Add,
            Expr::bin(BinOp::Mul, Expr::var("a"), Expr::var("b")),
            Expr::Cast(Type::Scalar(Scalar::Long), Box::new(Expr::var("c"))),
        );
        assert_eq!(print_expr(&e), "((a * b) + ((long) c))");

        let idx = Expr::index(Expr::var("p"), Expr::bin(BinOp::Add, Expr::var("i"), Expr::Int(1)));
        assert_eq!(print_expr(&idx), "p[(i + 1)]");

        assert_eq!(print_expr(&Expr::FloatSingle(1.5)), "1.5f");
        assert_eq!(print_expr(&Expr::Uint(7)), "7u");
        assert_eq!(
            print_expr(&Expr::Vector(Scalar::Float2, vec![Expr::FloatSingle(0.0), Expr::FloatSingle(1.0)])),
            "(float2)(0.0f, 1.0f)"
        );
    }

    #[test]
    fn kernel_rendering() {
        let k = Kernel {
            name: "axpy".into(),
            attributes: vec![
                KernelAttribute::ReqdWorkGroupSize(16, 1, 1),
                KernelAttribute::IntelReqdSubGroupSize(16),
            ],
            params: vec![
                KernelParam {
                    ty: Type::Scalar(Scalar::Float),
                    name: "alpha".into(),
                    pointer_to_pointer: false,
                },
                KernelParam {
                    ty: Type::Pointer {
                        elem: Scalar::Float,
                        space: AddrSpace::Global,
                    },
                    name: "x".into(),
                    pointer_to_pointer: false,
                },
            ],
            body: vec![Stmt::Assign {
                lhs: Expr::index(Expr::var("x"), Expr::call("get_global_id", vec![Expr::Int(0)])),
                rhs: Expr::bin(
                    BinOp::Mul,
                    Expr::var("alpha"),
                    Expr::index(Expr::var("x"), Expr::call("get_global_id", vec![Expr::Int(0)])),
                ),
            }],
        };
        let src = print_kernel(&k);
        assert!(src.contains("__attribute__((reqd_work_group_size(16, 1, 1)))"));
        assert!(src.contains("__attribute__((intel_reqd_sub_group_size(16)))"));
        assert!(src.contains("kernel void axpy(float alpha, __global float* x) {"));
        assert!(src.contains("x[get_global_id(0)] = (alpha * x[get_global_id(0)]);"));
    }
}
