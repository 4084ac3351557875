use serde::Serialize;
use std::{collections::BTreeMap, fmt};

/// CFOPs de devolução de venda: mercadoria retornando ao vendedor original.
/// Escriturados como entrada (ind_oper=0), CFOP 1.xxx/2.xxx.
const CFOPS_DEVOLUCAO_VENDA: [(&str, &str); 24] = [
    ("1201", "Devolução de venda de produção do estabelecimento"),
    ("1202", "Devolução de venda de mercadoria adquirida ou recebida de terceiros"),
    ("1203", "Devolução de venda de produção do estabelecimento destinada à ZFM/ALC"),
    ("1204", "Devolução de venda de mercadoria adquirida ou recebida de terceiros destinada à ZFM/ALC"),
    ("1208", "Devolução de produção do estabelecimento remetida em transferência"),
    ("1209", "Devolução de mercadoria adquirida ou recebida de terceiros remetida em transferência"),
    ("1410", "Devolução de venda de produção do estabelecimento com ST"),
    ("1411", "Devolução de venda de mercadoria adquirida ou recebida de terceiros com ST"),
    ("1553", "Devolução de venda de bem do ativo imobilizado"),
    ("1660", "Devolução de venda de combustível ou lubrificante destinado a industrialização"),
    ("1661", "Devolução de venda de combustível ou lubrificante destinado a comercialização"),
    ("1662", "Devolução de venda de combustível ou lubrificante destinado a consumidor ou usuário final"),
    ("2201", "Devolução de venda de produção do estabelecimento (interestadual)"),
    ("2202", "Devolução de venda de mercadoria adquirida ou recebida de terceiros (interestadual)"),
    ("2203", "Devolução de venda de produção do estabelecimento destinada à ZFM/ALC (interestadual)"),
    ("2204", "Devolução de venda de mercadoria adquirida ou recebida de terceiros destinada à ZFM/ALC (interestadual)"),
    ("2208", "Devolução de produção do estabelecimento remetida em transferência (interestadual)"),
    ("2209", "Devolução de mercadoria adquirida ou recebida de terceiros remetida em transferência (interestadual)"),
    ("2410", "Devolução de venda de produção do estabelecimento com ST (interestadual)"),
    ("2411", "Devolução de venda de mercadoria adquirida ou recebida de terceiros com ST (interestadual)"),
    ("2553", "Devolução de venda de bem do ativo imobilizado (interestadual)"),
    ("2660", "Devolução de venda de combustível ou lubrificante destinado a industrialização (interestadual)"),
    ("2661", "Devolução de venda de combustível ou lubrificante destinado a comercialização (interestadual)"),
    ("2662", "Devolução de venda de combustível ou lubrificante destinado a consumidor ou usuário final (interestadual)"),
];

/// CFOPs de devolução de compra: mercadoria sendo devolvida ao fornecedor.
/// Escriturados como saída (ind_oper=1), CFOP 5.xxx/6.xxx.
const CFOPS_DEVOLUCAO_COMPRA: [(&str, &str); 30] = [
    ("5201", "Devolução de compra para industrialização ou produção rural"),
    ("5202", "Devolução de compra para comercialização ou prestação de serviços"),
    ("5208", "Devolução de mercadoria recebida em transferência para industrialização ou produção rural"),
    ("5209", "Devolução de mercadoria recebida em transferência para comercialização"),
    ("5210", "Devolução de compra para utilização na prestação de serviço"),
    ("5410", "Devolução de compra para industrialização ou produção rural com ST"),
    ("5411", "Devolução de compra para comercialização com ST"),
    ("5412", "Devolução de bem do ativo imobilizado em operação com ST"),
    ("5413", "Devolução de mercadoria destinada ao uso ou consumo em operação com ST"),
    ("5503", "Devolução de mercadoria recebida com fim específico de exportação"),
    ("5553", "Devolução de compra de bem para o ativo imobilizado"),
    ("5556", "Devolução de compra de material de uso ou consumo"),
    ("5660", "Devolução de compra de combustível ou lubrificante adquirido para industrialização"),
    ("5661", "Devolução de compra de combustível ou lubrificante adquirido para comercialização"),
    ("5662", "Devolução de compra de combustível ou lubrificante adquirido por consumidor ou usuário final"),
    ("6201", "Devolução de compra para industrialização ou produção rural (interestadual)"),
    ("6202", "Devolução de compra para comercialização ou prestação de serviços (interestadual)"),
    ("6208", "Devolução de mercadoria recebida em transferência para industrialização ou produção rural (interestadual)"),
    ("6209", "Devolução de mercadoria recebida em transferência para comercialização (interestadual)"),
    ("6210", "Devolução de compra para utilização na prestação de serviço (interestadual)"),
    ("6410", "Devolução de compra para industrialização ou produção rural com ST (interestadual)"),
    ("6411", "Devolução de compra para comercialização com ST (interestadual)"),
    ("6412", "Devolução de bem do ativo imobilizado em operação com ST (interestadual)"),
    ("6413", "Devolução de mercadoria destinada ao uso ou consumo em operação com ST (interestadual)"),
    ("6503", "Devolução de mercadoria recebida com fim específico de exportação (interestadual)"),
    ("6553", "Devolução de compra de bem para o ativo imobilizado (interestadual)"),
    ("6556", "Devolução de compra de material de uso ou consumo (interestadual)"),
    ("6660", "Devolução de compra de combustível ou lubrificante adquirido para industrialização (interestadual)"),
    ("6661", "Devolução de compra de combustível ou lubrificante adquirido para comercialização (interestadual)"),
    ("6662", "Devolução de compra de combustível ou lubrificante adquirido por consumidor ou usuário final (interestadual)"),
];

/// Remove os pontos e os espaços de um CFOP ("5.202" -> "5202").
///
/// ```
/// use sped_devolucoes_reforma::normalizar_cfop;
///
/// assert_eq!(normalizar_cfop(" 5.202 "), "5202");
/// ```
pub fn normalizar_cfop(cfop: &str) -> String {
    cfop.trim().replace('.', "")
}

/// Tipo de devolução de um CFOP isolado ou de um documento inteiro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TipoDevolucao {
    DevolucaoVenda,
    DevolucaoCompra,
    /// Documento com CFOPs de devolução de venda e de compra.
    Misto,
    NaoDevolucao,
    /// Documento sem nenhum CFOP.
    NaoDefinido,
}

impl TipoDevolucao {
    pub fn is_devolucao(self) -> bool {
        matches!(
            self,
            TipoDevolucao::DevolucaoVenda | TipoDevolucao::DevolucaoCompra | TipoDevolucao::Misto
        )
    }
}

impl fmt::Display for TipoDevolucao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nome = match self {
            TipoDevolucao::DevolucaoVenda => "DEVOLUCAO_VENDA",
            TipoDevolucao::DevolucaoCompra => "DEVOLUCAO_COMPRA",
            TipoDevolucao::Misto => "MISTO",
            TipoDevolucao::NaoDevolucao => "NAO_DEVOLUCAO",
            TipoDevolucao::NaoDefinido => "NAO_DEFINIDO",
        };
        write!(f, "{nome}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificacaoCfop {
    pub eh_devolucao: bool,
    pub tipo: TipoDevolucao,
    pub descricao: String,
}

/// Tabelas de CFOPs de devolução usadas em uma execução.
///
/// Cada execução possui as suas próprias tabelas: códigos acrescentados com
/// `estender_venda`/`estender_compra` valem apenas para esta instância.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabelasCfop {
    venda: BTreeMap<String, String>,
    compra: BTreeMap<String, String>,
}

impl Default for TabelasCfop {
    fn default() -> Self {
        let tabela = |pares: &[(&str, &str)]| -> BTreeMap<String, String> {
            pares
                .iter()
                .map(|(codigo, descricao)| (codigo.to_string(), descricao.to_string()))
                .collect()
        };

        Self {
            venda: tabela(&CFOPS_DEVOLUCAO_VENDA),
            compra: tabela(&CFOPS_DEVOLUCAO_COMPRA),
        }
    }
}

impl TabelasCfop {
    /// Acrescenta (ou substitui) CFOPs de devolução de venda.
    pub fn estender_venda<I, K, V>(&mut self, extras: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (codigo, descricao) in extras {
            self.venda
                .insert(normalizar_cfop(codigo.as_ref()), descricao.into());
        }
    }

    /// Acrescenta (ou substitui) CFOPs de devolução de compra.
    pub fn estender_compra<I, K, V>(&mut self, extras: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (codigo, descricao) in extras {
            self.compra
                .insert(normalizar_cfop(codigo.as_ref()), descricao.into());
        }
    }

    /// Classifica um CFOP. A tabela de devolução de venda é consultada primeiro.
    ///
    /// ```
    /// use sped_devolucoes_reforma::{TabelasCfop, TipoDevolucao};
    ///
    /// let tabelas = TabelasCfop::default();
    /// assert_eq!(tabelas.classificar("5.202").tipo, TipoDevolucao::DevolucaoCompra);
    /// assert_eq!(tabelas.classificar("1202").tipo, TipoDevolucao::DevolucaoVenda);
    /// assert!(!tabelas.classificar("5102").eh_devolucao);
    /// ```
    pub fn classificar(&self, cfop: &str) -> ClassificacaoCfop {
        let cfop = normalizar_cfop(cfop);

        let encontrado = self
            .venda
            .get(&cfop)
            .map(|descricao| (TipoDevolucao::DevolucaoVenda, descricao))
            .or_else(|| {
                self.compra
                    .get(&cfop)
                    .map(|descricao| (TipoDevolucao::DevolucaoCompra, descricao))
            });

        match encontrado {
            Some((tipo, descricao)) => ClassificacaoCfop {
                eh_devolucao: true,
                tipo,
                descricao: descricao.clone(),
            },
            None => ClassificacaoCfop {
                eh_devolucao: false,
                tipo: TipoDevolucao::NaoDevolucao,
                descricao: String::new(),
            },
        }
    }

    pub fn eh_devolucao(&self, cfop: &str) -> bool {
        let cfop = normalizar_cfop(cfop);
        self.venda.contains_key(&cfop) || self.compra.contains_key(&cfop)
    }

    pub fn len_venda(&self) -> usize {
        self.venda.len()
    }

    pub fn len_compra(&self) -> usize {
        self.compra.len()
    }
}
