//! The recursive-descent parser.

use briar_common::{DbError, DbResult};
use briar_tree::refs::{column_ref, conjunction};
use briar_tree::{validate, NodeType, QueryNode};

use crate::lexer::{Lexer, Token, TokenKind};

/// Parses one SQL statement into a validated query tree.
pub fn parse_statement(sql: &str) -> DbResult<QueryNode> {
    let tokens = Lexer::new(sql).tokenize()?;
    let mut parser = Parser::new(tokens);
    let tree = parser.parse()?;
    validate(&tree).map_err(DbError::internal)?;
    Ok(tree)
}

/// The statement parser.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    /// Creates a parser over a token stream.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parses one statement, allowing a trailing `;`.
    pub fn parse(&mut self) -> DbResult<QueryNode> {
        let tree = self.parse_one()?;
        self.eat_symbol(";");
        if !matches!(self.peek().kind, TokenKind::End) {
            return Err(self.error("trailing input after statement"));
        }
        Ok(tree)
    }

    fn parse_one(&mut self) -> DbResult<QueryNode> {
        match self.peek().kind.keyword() {
            Some("SELECT") => self.parse_select(),
            Some("INSERT") => self.parse_insert(),
            Some("UPDATE") => self.parse_update(),
            Some("DELETE") => self.parse_delete(),
            Some("CREATE") => self.parse_create_table(),
            Some("DROP") => self.parse_drop_table(),
            Some("BEGIN") => {
                self.advance();
                self.expect_keyword("TRANSACTION")?;
                Ok(QueryNode::leaf(NodeType::BeginTransaction))
            }
            Some("COMMIT") => {
                self.advance();
                Ok(QueryNode::leaf(NodeType::Commit))
            }
            _ => Err(self.error("expected a statement")),
        }
    }

    // =========================================================================
    // SELECT
    // =========================================================================

    fn parse_select(&mut self) -> DbResult<QueryNode> {
        self.expect_keyword("SELECT")?;

        let star = self.eat_symbol("*");
        let columns = if star {
            Vec::new()
        } else {
            let mut columns = vec![self.parse_column_ref()?];
            while self.eat_symbol(",") {
                columns.push(self.parse_column_ref()?);
            }
            columns
        };

        self.expect_keyword("FROM")?;
        let mut source = self.parse_table_expr()?;

        if self.eat_keyword("WHERE") {
            let condition = self.parse_condition()?;
            source = QueryNode::with_children(NodeType::Filter, "", vec![source, condition]);
        }

        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            let column = self.parse_column_ref()?;
            let direction = if self.eat_keyword("DESC") {
                "DESC"
            } else {
                self.eat_keyword("ASC");
                "ASC"
            };
            let item =
                QueryNode::with_children(NodeType::OrderItem, direction, vec![column]);
            source = QueryNode::with_children(NodeType::Sort, "", vec![source, item]);
        }

        if self.eat_keyword("LIMIT") {
            let count = self.expect_number()?;
            source = QueryNode::with_children(NodeType::Limit, count, vec![source]);
        }

        Ok(if star {
            QueryNode::with_children(NodeType::Project, "*", vec![source])
        } else {
            let list = QueryNode::with_children(NodeType::List, "", columns);
            QueryNode::with_children(NodeType::Project, "", vec![list, source])
        })
    }

    fn parse_table_expr(&mut self) -> DbResult<QueryNode> {
        let mut left = self.parse_table_primary()?;
        loop {
            if self.eat_symbol(",") {
                let right = self.parse_table_primary()?;
                left = QueryNode::with_children(NodeType::Join, "CROSS", vec![left, right]);
            } else if self.eat_keyword("NATURAL") {
                self.expect_keyword("JOIN")?;
                let right = self.parse_table_primary()?;
                left = QueryNode::with_children(NodeType::Join, "NATURAL", vec![left, right]);
            } else if self.peek_keyword("INNER") || self.peek_keyword("JOIN") {
                self.eat_keyword("INNER");
                self.expect_keyword("JOIN")?;
                let right = self.parse_table_primary()?;
                self.expect_keyword("ON")?;
                let condition = self.parse_condition()?;
                left = QueryNode::with_children(
                    NodeType::Join,
                    "INNER",
                    vec![left, right, condition],
                );
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_table_primary(&mut self) -> DbResult<QueryNode> {
        let name = self.expect_identifier("table name")?;
        let relation = QueryNode::new(NodeType::Relation, name);
        if self.eat_keyword("AS") {
            let alias = self.expect_identifier("alias")?;
            Ok(QueryNode::with_children(
                NodeType::Alias,
                alias,
                vec![relation],
            ))
        } else {
            Ok(relation)
        }
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    fn parse_condition(&mut self) -> DbResult<QueryNode> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> DbResult<QueryNode> {
        let mut terms = vec![self.parse_and()?];
        while self.eat_keyword("OR") {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            QueryNode::with_children(NodeType::Operator, "OR", terms)
        })
    }

    fn parse_and(&mut self) -> DbResult<QueryNode> {
        let mut terms = vec![self.parse_not()?];
        while self.eat_keyword("AND") {
            terms.push(self.parse_not()?);
        }
        Ok(conjunction(terms))
    }

    fn parse_not(&mut self) -> DbResult<QueryNode> {
        if self.peek_keyword("NOT") {
            // NOT EXISTS is its own node type.
            if self.peek_at(1).kind.keyword() == Some("EXISTS") {
                self.advance();
                self.advance();
                let subquery = self.parse_subquery()?;
                return Ok(QueryNode::with_children(
                    NodeType::NotExistsExpr,
                    "",
                    vec![subquery],
                ));
            }
            // `x NOT IN (...)` puts the operand first, so a NOT at the start
            // of a term always negates a whole condition.
            self.advance();
            let inner = self.parse_not()?;
            return Ok(QueryNode::with_children(
                NodeType::Operator,
                "NOT",
                vec![inner],
            ));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> DbResult<QueryNode> {
        if self.eat_keyword("EXISTS") {
            let subquery = self.parse_subquery()?;
            return Ok(QueryNode::with_children(
                NodeType::ExistsExpr,
                "",
                vec![subquery],
            ));
        }

        // A parenthesis may open a grouped condition or a parenthesized
        // value expression; try the condition first and backtrack.
        if self.peek_symbol("(") {
            let snapshot = self.position;
            self.advance();
            if let Ok(grouped) = self.parse_or() {
                if self.eat_symbol(")") && !self.peek_predicate_suffix() {
                    return Ok(grouped);
                }
            }
            self.position = snapshot;
        }

        let operand = self.parse_operand()?;
        self.parse_predicate_suffix(operand)
    }

    fn peek_predicate_suffix(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Symbol(s) => {
                matches!(s.as_str(), "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=" | "+" | "-" | "*" | "/")
            }
            TokenKind::Keyword(k) => {
                matches!(k.as_str(), "IN" | "NOT" | "BETWEEN" | "IS" | "LIKE")
            }
            _ => false,
        }
    }

    fn parse_predicate_suffix(&mut self, operand: QueryNode) -> DbResult<QueryNode> {
        if let TokenKind::Symbol(symbol) = &self.peek().kind {
            let symbol = symbol.clone();
            if matches!(symbol.as_str(), "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=") {
                self.advance();
                let rhs = self.parse_operand()?;
                return Ok(QueryNode::with_children(
                    NodeType::Comparison,
                    symbol,
                    vec![operand, rhs],
                ));
            }
        }
        if self.eat_keyword("IN") {
            let list = self.parse_literal_list()?;
            return Ok(QueryNode::with_children(
                NodeType::InExpr,
                "",
                vec![operand, list],
            ));
        }
        if self.peek_keyword("NOT") && self.peek_at(1).kind.keyword() == Some("IN") {
            self.advance();
            self.advance();
            let list = self.parse_literal_list()?;
            return Ok(QueryNode::with_children(
                NodeType::NotInExpr,
                "",
                vec![operand, list],
            ));
        }
        if self.eat_keyword("BETWEEN") {
            let low = self.parse_operand()?;
            self.expect_keyword("AND")?;
            let high = self.parse_operand()?;
            return Ok(QueryNode::with_children(
                NodeType::BetweenExpr,
                "",
                vec![operand, low, high],
            ));
        }
        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            let node_type = if negated {
                NodeType::IsNotNullExpr
            } else {
                NodeType::IsNullExpr
            };
            return Ok(QueryNode::with_children(node_type, "", vec![operand]));
        }
        if self.eat_keyword("LIKE") {
            let pattern = match self.peek().kind.clone() {
                TokenKind::Str(text) => {
                    self.advance();
                    QueryNode::new(NodeType::LiteralString, text)
                }
                _ => return Err(self.error("LIKE expects a string pattern")),
            };
            return Ok(QueryNode::with_children(
                NodeType::LikeExpr,
                "",
                vec![operand, pattern],
            ));
        }
        Err(self.error("expected a comparison or predicate"))
    }

    fn parse_subquery(&mut self) -> DbResult<QueryNode> {
        self.expect_symbol("(")?;
        let subquery = self.parse_select()?;
        self.expect_symbol(")")?;
        Ok(subquery)
    }

    fn parse_literal_list(&mut self) -> DbResult<QueryNode> {
        self.expect_symbol("(")?;
        let mut items = vec![self.parse_literal()?];
        while self.eat_symbol(",") {
            items.push(self.parse_literal()?);
        }
        self.expect_symbol(")")?;
        Ok(QueryNode::with_children(NodeType::List, "", items))
    }

    // =========================================================================
    // Value expressions
    // =========================================================================

    fn parse_operand(&mut self) -> DbResult<QueryNode> {
        let mut left = self.parse_term()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Symbol(s) if s == "+" || s == "-" => s.clone(),
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = QueryNode::with_children(NodeType::ArithExpr, op, vec![left, right]);
        }
    }

    fn parse_term(&mut self) -> DbResult<QueryNode> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Symbol(s) if s == "*" || s == "/" => s.clone(),
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_factor()?;
            left = QueryNode::with_children(NodeType::ArithExpr, op, vec![left, right]);
        }
    }

    fn parse_factor(&mut self) -> DbResult<QueryNode> {
        match self.peek().kind.clone() {
            TokenKind::Number(_) | TokenKind::Str(_) => self.parse_literal(),
            TokenKind::Keyword(k) if matches!(k.as_str(), "TRUE" | "FALSE" | "NULL") => {
                self.parse_literal()
            }
            TokenKind::Symbol(s) if s == "-" => self.parse_literal(),
            TokenKind::Symbol(s) if s == "(" => {
                self.advance();
                let inner = self.parse_operand()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            TokenKind::Identifier(_) => self.parse_column_ref(),
            _ => Err(self.error("expected a value expression")),
        }
    }

    fn parse_literal(&mut self) -> DbResult<QueryNode> {
        let negative = self.eat_symbol("-");
        match self.peek().kind.clone() {
            TokenKind::Number(text) => {
                self.advance();
                let text = if negative { format!("-{}", text) } else { text };
                Ok(QueryNode::new(NodeType::LiteralNumber, text))
            }
            TokenKind::Str(text) if !negative => {
                self.advance();
                Ok(QueryNode::new(NodeType::LiteralString, text))
            }
            TokenKind::Keyword(k) if !negative && (k == "TRUE" || k == "FALSE") => {
                self.advance();
                Ok(QueryNode::new(
                    NodeType::LiteralBoolean,
                    k.to_ascii_lowercase(),
                ))
            }
            TokenKind::Keyword(k) if !negative && k == "NULL" => {
                self.advance();
                Ok(QueryNode::leaf(NodeType::LiteralNull))
            }
            _ => Err(self.error("expected a literal")),
        }
    }

    fn parse_column_ref(&mut self) -> DbResult<QueryNode> {
        let first = self.expect_identifier("column name")?;
        if self.eat_symbol(".") {
            let column = self.expect_identifier("column name")?;
            Ok(column_ref(Some(&first), &column))
        } else {
            Ok(column_ref(None, &first))
        }
    }

    // =========================================================================
    // DML
    // =========================================================================

    fn parse_insert(&mut self) -> DbResult<QueryNode> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.expect_identifier("table name")?;

        let mut columns = Vec::new();
        if self.peek_symbol("(") {
            self.advance();
            loop {
                let name = self.expect_identifier("column name")?;
                columns.push(QueryNode::with_children(
                    NodeType::ColumnName,
                    "",
                    vec![QueryNode::new(NodeType::Identifier, name)],
                ));
                if !self.eat_symbol(",") {
                    break;
                }
            }
            self.expect_symbol(")")?;
        }

        self.expect_keyword("VALUES")?;
        self.expect_symbol("(")?;
        let mut values = vec![self.parse_literal()?];
        while self.eat_symbol(",") {
            values.push(self.parse_literal()?);
        }
        self.expect_symbol(")")?;

        Ok(QueryNode::with_children(
            NodeType::InsertQuery,
            table,
            vec![
                QueryNode::with_children(NodeType::List, "", columns),
                QueryNode::with_children(NodeType::List, "", values),
            ],
        ))
    }

    fn parse_update(&mut self) -> DbResult<QueryNode> {
        self.expect_keyword("UPDATE")?;
        let table = self.expect_identifier("table name")?;
        self.expect_keyword("SET")?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_identifier("column name")?;
            self.expect_symbol("=")?;
            let expr = self.parse_operand()?;
            assignments.push(QueryNode::with_children(
                NodeType::Assignment,
                column,
                vec![expr],
            ));
            if !self.eat_symbol(",") {
                break;
            }
        }

        let mut children = vec![QueryNode::with_children(NodeType::List, "", assignments)];
        if self.eat_keyword("WHERE") {
            children.push(self.parse_condition()?);
        }
        Ok(QueryNode::with_children(
            NodeType::UpdateQuery,
            table,
            children,
        ))
    }

    fn parse_delete(&mut self) -> DbResult<QueryNode> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.expect_identifier("table name")?;
        let mut children = Vec::new();
        if self.eat_keyword("WHERE") {
            children.push(self.parse_condition()?);
        }
        Ok(QueryNode::with_children(
            NodeType::DeleteQuery,
            table,
            children,
        ))
    }

    // =========================================================================
    // DDL
    // =========================================================================

    fn parse_create_table(&mut self) -> DbResult<QueryNode> {
        self.expect_keyword("CREATE")?;
        self.expect_keyword("TABLE")?;
        let table = self.expect_identifier("table name")?;
        self.expect_symbol("(")?;

        let mut defs = vec![self.parse_column_def()?];
        while self.eat_symbol(",") {
            defs.push(self.parse_column_def()?);
        }
        self.expect_symbol(")")?;

        Ok(QueryNode::with_children(
            NodeType::CreateTable,
            table,
            vec![QueryNode::with_children(NodeType::List, "", defs)],
        ))
    }

    fn parse_column_def(&mut self) -> DbResult<QueryNode> {
        let name = self.expect_identifier("column name")?;
        let type_text = self.parse_type_name()?;
        let mut def = QueryNode::new(NodeType::ColumnDef, name);
        def.add_child(QueryNode::new(NodeType::Identifier, type_text));

        loop {
            if self.eat_keyword("PRIMARY") {
                self.expect_keyword("KEY")?;
                def.add_child(QueryNode::new(NodeType::Identifier, "PRIMARY KEY"));
            } else if self.eat_keyword("FOREIGN") {
                self.expect_keyword("KEY")?;
                self.expect_keyword("REFERENCES")?;
                let ref_table = self.expect_identifier("referenced table")?;
                self.expect_symbol("(")?;
                let ref_column = self.expect_identifier("referenced column")?;
                self.expect_symbol(")")?;
                def.add_child(QueryNode::with_children(
                    NodeType::List,
                    "",
                    vec![
                        QueryNode::with_children(
                            NodeType::TableName,
                            "",
                            vec![QueryNode::new(NodeType::Identifier, ref_table)],
                        ),
                        QueryNode::with_children(
                            NodeType::ColumnName,
                            "",
                            vec![QueryNode::new(NodeType::Identifier, ref_column)],
                        ),
                    ],
                ));
            } else {
                return Ok(def);
            }
        }
    }

    fn parse_type_name(&mut self) -> DbResult<String> {
        let keyword = match self.peek().kind.keyword() {
            Some(k) if matches!(k, "INTEGER" | "INT" | "FLOAT" | "CHAR" | "VARCHAR") => {
                k.to_string()
            }
            _ => return Err(self.error("expected a column type")),
        };
        self.advance();
        match keyword.as_str() {
            "INTEGER" | "INT" => Ok("INTEGER".to_string()),
            "FLOAT" => Ok("FLOAT".to_string()),
            sized => {
                self.expect_symbol("(")?;
                let size = self.expect_number()?;
                self.expect_symbol(")")?;
                Ok(format!("{}({})", sized, size))
            }
        }
    }

    fn parse_drop_table(&mut self) -> DbResult<QueryNode> {
        self.expect_keyword("DROP")?;
        self.expect_keyword("TABLE")?;
        let table = self.expect_identifier("table name")?;
        let mut node = QueryNode::new(NodeType::DropTable, table);
        if self.eat_keyword("CASCADE") {
            node.add_child(QueryNode::new(NodeType::Identifier, "CASCADE"));
        } else if self.eat_keyword("RESTRICT") {
            node.add_child(QueryNode::new(NodeType::Identifier, "RESTRICT"));
        }
        Ok(node)
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn peek(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.position + offset).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek().kind.keyword() == Some(keyword)
    }

    fn peek_symbol(&self, symbol: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Symbol(s) if s == symbol)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.peek_symbol(symbol) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> DbResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", keyword)))
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> DbResult<()> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", symbol)))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> DbResult<String> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn expect_number(&mut self) -> DbResult<String> {
        match self.peek().kind.clone() {
            TokenKind::Number(text) => {
                self.advance();
                Ok(text)
            }
            _ => Err(self.error("expected a number")),
        }
    }

    fn error(&self, message: impl Into<String>) -> DbError {
        DbError::parse(self.peek().position, message)
    }
}
