use chrono::{Datelike, NaiveDate};
use log::{debug, info};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    ops::AddAssign,
    str::FromStr,
};

use crate::{
    ArquivoSped, Enriquecimento, IndOper, RE_MULTISPACE, RE_PERIODO, RegimeTributario,
    Registro0150, Registro0200, RegistroC100, RegistroC170, RegistroE111, SpedError, SpedResult,
    get_tipo_de_ajuste, normalizar_cfop, reducoes_ncm_padrao, so_digitos,
};

/// Arredondamento monetário: duas casas, meio para longe do zero.
pub fn arredondar(valor: Decimal) -> Decimal {
    valor.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `parte / todo * 100` com quatro casas; zero quando `todo` é zero.
pub fn percentual(parte: Decimal, todo: Decimal) -> Decimal {
    parte
        .checked_div(todo)
        .map(|razao| razao.saturating_mul(dec!(100)))
        .unwrap_or_default()
        .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

/// Alíquotas do cenário da Reforma Tributária (em %).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParametrosReforma {
    pub aliquota_ibs: Decimal,
    pub aliquota_cbs: Decimal,
    pub aliquota_is: Decimal,
    /// NCM -> percentual de redução das alíquotas.
    pub reducoes_ncm: BTreeMap<String, Decimal>,
}

impl Default for ParametrosReforma {
    fn default() -> Self {
        Self {
            aliquota_ibs: dec!(18.5),
            aliquota_cbs: dec!(8.5),
            aliquota_is: Decimal::ZERO,
            reducoes_ncm: reducoes_ncm_padrao(),
        }
    }
}

impl ParametrosReforma {
    pub fn aliquota_total(&self) -> Decimal {
        self.aliquota_ibs + self.aliquota_cbs + self.aliquota_is
    }

    pub fn reducao(&self, ncm: &str) -> Decimal {
        self.reducoes_ncm
            .get(ncm.trim())
            .copied()
            .unwrap_or_default()
    }
}

/// Competência no formato AAAA-MM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Periodo {
    pub ano: i32,
    pub mes: u32,
}

impl From<NaiveDate> for Periodo {
    fn from(data: NaiveDate) -> Self {
        Self {
            ano: data.year(),
            mes: data.month(),
        }
    }
}

impl FromStr for Periodo {
    type Err = SpedError;

    /// ```
    /// use sped_devolucoes_reforma::Periodo;
    ///
    /// let periodo: Periodo = "2024-03".parse().unwrap();
    /// assert_eq!((periodo.ano, periodo.mes), (2024, 3));
    /// assert!("2024-13".parse::<Periodo>().is_err());
    /// ```
    fn from_str(texto: &str) -> SpedResult<Self> {
        let invalido = || SpedError::InvalidPeriod(texto.to_string());
        let captura = RE_PERIODO.captures(texto.trim()).ok_or_else(invalido)?;

        let ano = captura[1].parse().map_err(|_| invalido())?;
        let mes = captura[2].parse().map_err(|_| invalido())?;

        Ok(Self { ano, mes })
    }
}

impl fmt::Display for Periodo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.ano, self.mes)
    }
}

/// Quais arquivos entram no relatório.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selecao {
    /// CNPJ (apenas dígitos) do declarante.
    pub cnpj: Option<String>,
    pub periodo_inicial: Option<Periodo>,
    pub periodo_final: Option<Periodo>,
    /// Inclui os estabelecimentos com a mesma raiz (8 dígitos) do CNPJ.
    pub agrupar_filiais: bool,
}

impl Selecao {
    pub fn inclui(&self, arquivo: &ArquivoSped) -> bool {
        let abertura = arquivo.registro_0000.as_ref();

        if let Some(cnpj) = self.cnpj.as_deref() {
            let Some(declarante) = abertura.map(|a| a.documento_do_declarante()) else {
                return false;
            };

            let mesmo = if self.agrupar_filiais {
                raiz_do_cnpj(&declarante) == raiz_do_cnpj(cnpj)
            } else {
                declarante == cnpj
            };

            if !mesmo {
                return false;
            }
        }

        if self.periodo_inicial.is_none() && self.periodo_final.is_none() {
            return true;
        }

        let Some(periodo) = abertura.and_then(|a| a.dt_ini).map(Periodo::from) else {
            return false;
        };

        self.periodo_inicial.is_none_or(|inicio| periodo >= inicio)
            && self.periodo_final.is_none_or(|fim| periodo <= fim)
    }
}

fn raiz_do_cnpj(cnpj: &str) -> String {
    so_digitos(cnpj).chars().take(8).collect()
}

/// Somatórios de um grupo (produto, fornecedor, CFOP ou UF).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totais {
    pub quantidade: Decimal,
    pub valor_bruto: Decimal,
    pub icms: Decimal,
    pub icms_st: Decimal,
    pub ipi: Decimal,
    pub pis: Decimal,
    pub cofins: Decimal,
    pub vl_bc_icms: Decimal,
    pub vl_bc_pis: Decimal,
    pub vl_bc_cofins: Decimal,
}

impl Totais {
    pub fn do_item(item: &RegistroC170) -> Self {
        Self {
            quantidade: item.qtd,
            valor_bruto: item.vl_item,
            icms: item.vl_icms,
            icms_st: item.vl_icms_st,
            ipi: item.vl_ipi,
            pis: item.vl_pis,
            cofins: item.vl_cofins,
            vl_bc_icms: item.vl_bc_icms,
            vl_bc_pis: item.vl_bc_pis,
            vl_bc_cofins: item.vl_bc_cofins,
        }
    }

    /// Valores totais do documento (C100), sem quantidade.
    pub fn do_documento(documento: &RegistroC100) -> Self {
        Self {
            valor_bruto: documento.vl_doc,
            icms: documento.vl_icms,
            icms_st: documento.vl_icms_st,
            ipi: documento.vl_ipi,
            pis: documento.vl_pis,
            cofins: documento.vl_cofins,
            vl_bc_icms: documento.vl_bc_icms,
            ..Default::default()
        }
    }

    pub fn do_produto_externo(produto: &ProdutoExterno) -> Self {
        Self {
            quantidade: produto.quantidade,
            valor_bruto: produto.valor_total,
            icms: produto.icms,
            icms_st: produto.icms_st,
            ipi: produto.ipi,
            pis: produto.pis,
            cofins: produto.cofins,
            ..Default::default()
        }
    }

    /// ICMS + ICMS-ST + IPI + PIS + COFINS.
    pub fn total_tributos(&self) -> Decimal {
        self.icms + self.icms_st + self.ipi + self.pis + self.cofins
    }

    pub fn valor_liquido(&self) -> Decimal {
        self.valor_bruto - self.total_tributos()
    }
}

impl AddAssign for Totais {
    fn add_assign(&mut self, outro: Self) {
        self.quantidade += outro.quantidade;
        self.valor_bruto += outro.valor_bruto;
        self.icms += outro.icms;
        self.icms_st += outro.icms_st;
        self.ipi += outro.ipi;
        self.pis += outro.pis;
        self.cofins += outro.cofins;
        self.vl_bc_icms += outro.vl_bc_icms;
        self.vl_bc_pis += outro.vl_bc_pis;
        self.vl_bc_cofins += outro.vl_bc_cofins;
    }
}

impl<'a> std::iter::Sum<&'a Totais> for Totais {
    fn sum<I: Iterator<Item = &'a Totais>>(iter: I) -> Self {
        iter.fold(Totais::default(), |mut acc, t| {
            acc += *t;
            acc
        })
    }
}

/// Carga atual e cenário da Reforma de um grupo.
///
/// A mesma fórmula vale para todos os grupos:
///
/// ```text
/// aliquota_efetiva = (ibs + cbs + is) * (1 - reducao / 100)
/// ibs_cbs          = arredondar(valor_liquido * aliquota_efetiva / 100)
/// total_reforma    = valor_liquido + ibs_cbs
/// diferenca        = ibs_cbs - total_tributos
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Simulacao {
    pub total_tributos: Decimal,
    pub valor_liquido: Decimal,
    pub carga_atual: Decimal,
    pub perc_reducao: Decimal,
    pub aliquota_efetiva: Decimal,
    pub ibs_cbs: Decimal,
    pub total_reforma: Decimal,
    pub diferenca: Decimal,
    pub carga_reforma: Decimal,
}

impl Simulacao {
    pub fn calcular(totais: &Totais, aliquota_total: Decimal, perc_reducao: Decimal) -> Self {
        let total_tributos = totais.total_tributos();
        let valor_liquido = totais.valor_liquido();

        let aliquota_efetiva =
            aliquota_total.saturating_mul(Decimal::ONE - perc_reducao / dec!(100));
        let ibs_cbs = arredondar(valor_liquido.saturating_mul(aliquota_efetiva) / dec!(100));

        Self {
            total_tributos,
            valor_liquido,
            carga_atual: percentual(total_tributos, totais.valor_bruto),
            perc_reducao,
            aliquota_efetiva,
            ibs_cbs,
            total_reforma: valor_liquido + ibs_cbs,
            diferenca: ibs_cbs - total_tributos,
            carga_reforma: percentual(ibs_cbs, valor_liquido),
        }
    }
}

/// Valores divididos pela quantidade (ou por 1 quando a quantidade não é positiva).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValoresUnitarios {
    pub valor_bruto: Decimal,
    pub valor_liquido: Decimal,
    pub ibs_cbs: Decimal,
    pub total_reforma: Decimal,
    pub diferenca: Decimal,
}

impl ValoresUnitarios {
    pub fn calcular(totais: &Totais, simulacao: &Simulacao) -> Self {
        let quantidade = if totais.quantidade > Decimal::ZERO {
            totais.quantidade
        } else {
            Decimal::ONE
        };

        let unitario = |valor: Decimal| arredondar(valor.checked_div(quantidade).unwrap_or_default());

        Self {
            valor_bruto: unitario(totais.valor_bruto),
            valor_liquido: unitario(simulacao.valor_liquido),
            ibs_cbs: unitario(simulacao.ibs_cbs),
            total_reforma: unitario(simulacao.total_reforma),
            diferenca: unitario(simulacao.diferenca),
        }
    }
}

/// Alíquotas efetivas apuradas a partir das bases somadas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AliquotasEfetivas {
    pub icms: Decimal,
    pub pis: Decimal,
    pub cofins: Decimal,
}

impl AliquotasEfetivas {
    pub fn calcular(totais: &Totais) -> Self {
        let aliquota = |valor: Decimal, base: Decimal, casas: u32| {
            if base > Decimal::ZERO {
                percentual(valor, base).round_dp_with_strategy(casas, RoundingStrategy::MidpointAwayFromZero)
            } else {
                Decimal::ZERO
            }
        };

        Self {
            icms: aliquota(totais.icms, totais.vl_bc_icms, 2),
            pis: aliquota(totais.pis, totais.vl_bc_pis, 4),
            cofins: aliquota(totais.cofins, totais.vl_bc_cofins, 4),
        }
    }
}

/// Origem dos itens de um quadro.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Fonte {
    /// Registros C170 do Sped.
    #[default]
    Sped,
    /// Lista de itens obtida fora do Sped (consulta de XML das NF-e).
    Externa,
}

impl fmt::Display for Fonte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nome = match self {
            Fonte::Sped => "Sped EFD (C170)",
            Fonte::Externa => "Fonte externa (XML das NF-e)",
        };
        write!(f, "{nome}")
    }
}

/// Item de NF-e de saída obtido fora do Sped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProdutoExterno {
    pub chave_nfe: String,
    pub codigo: String,
    pub descricao: String,
    pub ncm: String,
    pub cfop: String,
    pub quantidade: Decimal,
    pub valor_total: Decimal,
    pub icms: Decimal,
    pub icms_st: Decimal,
    pub ipi: Decimal,
    pub pis: Decimal,
    pub cofins: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumoProduto {
    pub codigo: String,
    pub descricao: String,
    pub ncm: String,
    /// CFOP do primeiro item do grupo.
    pub cfop: String,
    pub fonte: Fonte,
    pub totais: Totais,
    pub simulacao: Simulacao,
    pub unitarios: ValoresUnitarios,
    pub aliquotas: AliquotasEfetivas,
}

impl ResumoProduto {
    fn new(
        codigo: String,
        descricao: String,
        ncm: String,
        cfop: String,
        fonte: Fonte,
        totais: Totais,
        parametros: &ParametrosReforma,
    ) -> Self {
        let simulacao = Simulacao::calcular(&totais, parametros.aliquota_total(), parametros.reducao(&ncm));

        Self {
            unitarios: ValoresUnitarios::calcular(&totais, &simulacao),
            aliquotas: AliquotasEfetivas::calcular(&totais),
            codigo,
            descricao,
            ncm,
            cfop,
            fonte,
            totais,
            simulacao,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumoFornecedor {
    pub cod_part: String,
    pub cnpj_cpf: String,
    pub nome: String,
    pub regime: RegimeTributario,
    pub uf: String,
    pub documentos: usize,
    pub totais: Totais,
    pub simulacao: Simulacao,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumoCfop {
    pub cfop: String,
    pub itens: usize,
    pub totais: Totais,
    pub simulacao: Simulacao,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumoUf {
    pub uf: String,
    pub documentos: usize,
    pub totais: Totais,
    pub simulacao: Simulacao,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumoAjuste {
    pub codigo: String,
    pub descricao: String,
    pub tipo: String,
    pub valor: Decimal,
}

/// Totais de um sentido (entradas ou saídas) no período.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TotaisPeriodo {
    pub totais: Totais,
    pub total_tributos: Decimal,
    pub valor_liquido: Decimal,
    pub ibs_cbs: Decimal,
    pub total_reforma: Decimal,
    pub carga_atual: Decimal,
    pub carga_reforma: Decimal,
}

impl TotaisPeriodo {
    fn de_produtos(produtos: &[ResumoProduto]) -> Self {
        let totais: Totais = produtos.iter().map(|p| &p.totais).sum();
        let ibs_cbs: Decimal = produtos.iter().map(|p| p.simulacao.ibs_cbs).sum();
        let total_tributos = totais.total_tributos();
        let valor_liquido = totais.valor_liquido();

        Self {
            totais,
            total_tributos,
            valor_liquido,
            ibs_cbs,
            total_reforma: valor_liquido + ibs_cbs,
            carga_atual: percentual(total_tributos, totais.valor_bruto),
            carga_reforma: percentual(ibs_cbs, valor_liquido),
        }
    }
}

/// Débitos (saídas) menos créditos (entradas), hoje e no cenário da Reforma.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Apuracao {
    pub debitos_atual: Decimal,
    pub creditos_atual: Decimal,
    pub resultado_atual: Decimal,
    pub carga_atual: Decimal,
    pub debitos_reforma: Decimal,
    pub creditos_reforma: Decimal,
    pub resultado_reforma: Decimal,
    pub carga_reforma: Decimal,
}

impl Apuracao {
    pub fn calcular(entradas: &TotaisPeriodo, saidas: &TotaisPeriodo) -> Self {
        let resultado_atual = saidas.total_tributos - entradas.total_tributos;
        let resultado_reforma = saidas.ibs_cbs - entradas.ibs_cbs;

        Self {
            debitos_atual: saidas.total_tributos,
            creditos_atual: entradas.total_tributos,
            resultado_atual,
            carga_atual: percentual(resultado_atual, saidas.totais.valor_bruto),
            debitos_reforma: saidas.ibs_cbs,
            creditos_reforma: entradas.ibs_cbs,
            resultado_reforma,
            carga_reforma: percentual(resultado_reforma, saidas.valor_liquido),
        }
    }
}

/// Relatório fiscal do período: quadros por produto, fornecedor, CFOP, UF e
/// ajuste de apuração, com os totais e a apuração comparada.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelatorioFiscal {
    pub selecao: Selecao,
    pub arquivos: usize,
    pub produtos_entradas: Vec<ResumoProduto>,
    pub produtos_saidas: Vec<ResumoProduto>,
    pub fonte_saidas: Fonte,
    pub fornecedores: Vec<ResumoFornecedor>,
    pub cfops_entradas: Vec<ResumoCfop>,
    pub ufs_entradas: Vec<ResumoUf>,
    pub ajustes: Vec<ResumoAjuste>,
    pub total_ajustes: Decimal,
    pub totais_entradas: TotaisPeriodo,
    pub totais_saidas: TotaisPeriodo,
    pub apuracao: Apuracao,
}

/// Gera o `RelatorioFiscal` a partir de arquivos já decodificados.
#[derive(Debug, Clone, Default)]
pub struct Agregador {
    pub parametros: ParametrosReforma,
    pub selecao: Selecao,
    /// CNPJ/CPF do participante -> dados externos.
    pub enriquecimentos: HashMap<String, Enriquecimento>,
    /// Usados apenas quando não há itens de saída no Sped.
    pub produtos_externos: Vec<ProdutoExterno>,
}

/// Índices montados sobre os arquivos selecionados.
struct Cadastros<'a> {
    itens: HashMap<&'a str, &'a Registro0200>,
    participantes: HashMap<&'a str, &'a Registro0150>,
}

impl<'a> Cadastros<'a> {
    /// Entre arquivos, o 0200 do último prevalece e o 0150 do primeiro é mantido.
    fn new(arquivos: &[&'a ArquivoSped]) -> Self {
        let mut itens = HashMap::new();
        let mut participantes = HashMap::new();

        for &arquivo in arquivos {
            itens.extend(arquivo.indice_itens());
            for (cod_part, participante) in arquivo.indice_participantes() {
                participantes.entry(cod_part).or_insert(participante);
            }
        }

        Self {
            itens,
            participantes,
        }
    }

    /// Descrição do 0200; na falta dele, a descrição complementar do C170 ou o próprio código.
    fn descricao(&self, item: &RegistroC170) -> String {
        let descricao = self
            .itens
            .get(item.cod_item.as_str())
            .map(|i| i.descr_item.trim())
            .filter(|d| !d.is_empty())
            .or_else(|| Some(item.descr_compl.trim()).filter(|d| !d.is_empty()))
            .unwrap_or(item.cod_item.as_str());

        RE_MULTISPACE.replace_all(descricao, " ").into_owned()
    }

    fn ncm(&self, cod_item: &str) -> String {
        self.itens
            .get(cod_item)
            .map(|i| i.cod_ncm.trim().to_string())
            .unwrap_or_default()
    }
}

impl Agregador {
    pub fn new(parametros: ParametrosReforma, selecao: Selecao) -> Self {
        Self {
            parametros,
            selecao,
            ..Default::default()
        }
    }

    pub fn com_enriquecimentos(mut self, enriquecimentos: HashMap<String, Enriquecimento>) -> Self {
        self.enriquecimentos = enriquecimentos;
        self
    }

    pub fn com_produtos_externos(mut self, produtos: Vec<ProdutoExterno>) -> Self {
        self.produtos_externos = produtos;
        self
    }

    fn enriquecimento(&self, participante: &Registro0150) -> Option<&Enriquecimento> {
        participante
            .cnpj_cpf()
            .and_then(|doc| self.enriquecimentos.get(doc))
    }

    fn uf_do_participante(&self, participante: &Registro0150) -> Option<String> {
        self.enriquecimento(participante)
            .and_then(|info| info.uf.as_deref())
            .map(str::trim)
            .filter(|uf| !uf.is_empty())
            .or_else(|| participante.uf())
            .map(str::to_uppercase)
    }

    pub fn gerar<'a>(&self, arquivos: impl IntoIterator<Item = &'a ArquivoSped>) -> RelatorioFiscal {
        let mut total = 0;
        let selecionados: Vec<&ArquivoSped> = arquivos
            .into_iter()
            .inspect(|_| total += 1)
            .filter(|arquivo| self.selecao.inclui(arquivo))
            .collect();

        info!(
            "Relatório fiscal: {} de {} arquivo(s) selecionado(s).",
            selecionados.len(),
            total
        );

        let cadastros = Cadastros::new(&selecionados);

        let documentos: Vec<&RegistroC100> = selecionados
            .iter()
            .flat_map(|arquivo| arquivo.documentos.iter())
            .collect();

        let documentos_entrada: Vec<&RegistroC100> = documentos
            .iter()
            .copied()
            .filter(|doc| doc.ind_oper == IndOper::Entrada)
            .collect();

        let itens_entrada: Vec<&RegistroC170> = documentos_entrada
            .iter()
            .flat_map(|doc| doc.itens.iter())
            .collect();

        let itens_saida: Vec<&RegistroC170> = documentos
            .iter()
            .filter(|doc| doc.ind_oper == IndOper::Saida)
            .flat_map(|doc| doc.itens.iter())
            .collect();

        let produtos_entradas = self.agrupar_produtos(&itens_entrada, &cadastros);

        let (produtos_saidas, fonte_saidas) =
            if itens_saida.is_empty() && !self.produtos_externos.is_empty() {
                debug!(
                    "Sem itens de saída no Sped: usando {} produto(s) de fonte externa.",
                    self.produtos_externos.len()
                );
                (
                    self.agrupar_produtos_externos(&self.produtos_externos),
                    Fonte::Externa,
                )
            } else {
                (self.agrupar_produtos(&itens_saida, &cadastros), Fonte::Sped)
            };

        let ajustes: Vec<ResumoAjuste> = agrupar_ajustes(
            selecionados
                .iter()
                .flat_map(|arquivo| arquivo.ajustes.iter()),
        );

        let totais_entradas = TotaisPeriodo::de_produtos(&produtos_entradas);
        let totais_saidas = TotaisPeriodo::de_produtos(&produtos_saidas);

        RelatorioFiscal {
            selecao: self.selecao.clone(),
            arquivos: selecionados.len(),
            fornecedores: self.agrupar_fornecedores(&documentos_entrada, &cadastros),
            cfops_entradas: self.agrupar_cfops(&itens_entrada),
            ufs_entradas: self.agrupar_ufs(&documentos_entrada, &cadastros),
            total_ajustes: ajustes.iter().map(|a| a.valor).sum(),
            ajustes,
            apuracao: Apuracao::calcular(&totais_entradas, &totais_saidas),
            totais_entradas,
            totais_saidas,
            produtos_entradas,
            produtos_saidas,
            fonte_saidas,
        }
    }

    /// Agrupa itens C170 pelo código do item.
    fn agrupar_produtos(&self, itens: &[&RegistroC170], cadastros: &Cadastros) -> Vec<ResumoProduto> {
        let mut grupos: HashMap<&str, (Totais, &RegistroC170)> = HashMap::new();

        for &item in itens {
            grupos
                .entry(item.cod_item.as_str())
                .or_insert_with(|| (Totais::default(), item))
                .0 += Totais::do_item(item);
        }

        let mut produtos: Vec<ResumoProduto> = grupos
            .into_values()
            .map(|(totais, primeiro)| {
                ResumoProduto::new(
                    primeiro.cod_item.clone(),
                    cadastros.descricao(primeiro),
                    cadastros.ncm(&primeiro.cod_item),
                    normalizar_cfop(&primeiro.cfop),
                    Fonte::Sped,
                    totais,
                    &self.parametros,
                )
            })
            .collect();

        ordenar_produtos(&mut produtos);
        produtos
    }

    /// Agrupa produtos externos por código + NCM, com as mesmas fórmulas dos itens do Sped.
    pub fn agrupar_produtos_externos(&self, externos: &[ProdutoExterno]) -> Vec<ResumoProduto> {
        let mut grupos: HashMap<(&str, &str), (Totais, &ProdutoExterno)> = HashMap::new();

        for produto in externos {
            grupos
                .entry((produto.codigo.trim(), produto.ncm.trim()))
                .or_insert_with(|| (Totais::default(), produto))
                .0 += Totais::do_produto_externo(produto);
        }

        let mut produtos: Vec<ResumoProduto> = grupos
            .into_iter()
            .map(|((codigo, ncm), (totais, primeiro))| {
                let descricao = Some(primeiro.descricao.trim())
                    .filter(|d| !d.is_empty())
                    .unwrap_or(codigo);

                ResumoProduto::new(
                    codigo.to_string(),
                    RE_MULTISPACE.replace_all(descricao, " ").into_owned(),
                    ncm.to_string(),
                    normalizar_cfop(&primeiro.cfop),
                    Fonte::Externa,
                    totais,
                    &self.parametros,
                )
            })
            .collect();

        ordenar_produtos(&mut produtos);
        produtos
    }

    /// Fornecedores das entradas, pelos valores totais dos documentos.
    fn agrupar_fornecedores(
        &self,
        documentos: &[&RegistroC100],
        cadastros: &Cadastros,
    ) -> Vec<ResumoFornecedor> {
        let mut grupos: HashMap<&str, (Totais, usize)> = HashMap::new();

        for doc in documentos.iter().filter(|doc| !doc.cod_part.trim().is_empty()) {
            let grupo = grupos.entry(doc.cod_part.as_str()).or_default();
            grupo.0 += Totais::do_documento(doc);
            grupo.1 += 1;
        }

        let aliquota_total = self.parametros.aliquota_total();

        let mut fornecedores: Vec<ResumoFornecedor> = grupos
            .into_iter()
            .map(|(cod_part, (totais, quantidade))| {
                let participante = cadastros.participantes.get(cod_part).copied();

                let (cnpj_cpf, nome, regime, uf) = match participante {
                    Some(p) => (
                        p.cnpj_cpf().unwrap_or("-").to_string(),
                        p.nome.clone(),
                        RegimeTributario::classificar(p, self.enriquecimento(p)),
                        self.uf_do_participante(p).unwrap_or_else(|| "-".to_string()),
                    ),
                    None => (
                        "-".to_string(),
                        "Não identificado".to_string(),
                        RegimeTributario::NaoIdentificado,
                        "-".to_string(),
                    ),
                };

                ResumoFornecedor {
                    cod_part: cod_part.to_string(),
                    cnpj_cpf,
                    nome,
                    regime,
                    uf,
                    documentos: quantidade,
                    simulacao: Simulacao::calcular(&totais, aliquota_total, Decimal::ZERO),
                    totais,
                }
            })
            .collect();

        fornecedores.sort_by(|a, b| {
            b.totais
                .valor_bruto
                .cmp(&a.totais.valor_bruto)
                .then_with(|| a.cod_part.cmp(&b.cod_part))
        });

        fornecedores
    }

    fn agrupar_cfops(&self, itens: &[&RegistroC170]) -> Vec<ResumoCfop> {
        let mut grupos: BTreeMap<String, (Totais, usize)> = BTreeMap::new();

        for item in itens {
            let cfop = normalizar_cfop(&item.cfop);
            if cfop.is_empty() {
                continue;
            }
            let grupo = grupos.entry(cfop).or_default();
            grupo.0 += Totais::do_item(item);
            grupo.1 += 1;
        }

        let aliquota_total = self.parametros.aliquota_total();

        grupos
            .into_iter()
            .map(|(cfop, (totais, itens))| ResumoCfop {
                cfop,
                itens,
                simulacao: Simulacao::calcular(&totais, aliquota_total, Decimal::ZERO),
                totais,
            })
            .collect()
    }

    fn agrupar_ufs(&self, documentos: &[&RegistroC100], cadastros: &Cadastros) -> Vec<ResumoUf> {
        let mut grupos: BTreeMap<String, (Totais, usize)> = BTreeMap::new();

        for doc in documentos {
            let uf = cadastros
                .participantes
                .get(doc.cod_part.as_str())
                .and_then(|p| self.uf_do_participante(p))
                .unwrap_or_else(|| "N/I".to_string());

            let grupo = grupos.entry(uf).or_default();
            grupo.0 += Totais::do_documento(doc);
            grupo.1 += 1;
        }

        let aliquota_total = self.parametros.aliquota_total();

        grupos
            .into_iter()
            .map(|(uf, (totais, documentos))| ResumoUf {
                uf,
                documentos,
                simulacao: Simulacao::calcular(&totais, aliquota_total, Decimal::ZERO),
                totais,
            })
            .collect()
    }
}

/// Maior valor bruto primeiro; empate pelo código.
fn ordenar_produtos(produtos: &mut [ResumoProduto]) {
    produtos.sort_by(|a, b| {
        b.totais
            .valor_bruto
            .cmp(&a.totais.valor_bruto)
            .then_with(|| a.codigo.cmp(&b.codigo))
            .then_with(|| a.ncm.cmp(&b.ncm))
    });
}

/// Agrupa os ajustes E111 pelo código, em ordem de código.
///
/// A descrição é a do primeiro ajuste do código; em branco, usa-se o tipo
/// de ajuste (3º caractere do código).
pub fn agrupar_ajustes<'a>(ajustes: impl IntoIterator<Item = &'a RegistroE111>) -> Vec<ResumoAjuste> {
    let mut grupos: BTreeMap<&str, ResumoAjuste> = BTreeMap::new();

    for ajuste in ajustes {
        let codigo = ajuste.cod_aj_apur.trim();
        let tipo = get_tipo_de_ajuste(codigo)
            .map(str::to_string)
            .unwrap_or_else(|| match codigo.chars().nth(2) {
                Some(c) => format!("Tipo {c}"),
                None => "-".to_string(),
            });

        grupos
            .entry(codigo)
            .or_insert_with(|| {
                let descricao = ajuste.descr_compl_aj.trim();
                ResumoAjuste {
                    codigo: codigo.to_string(),
                    descricao: if descricao.is_empty() {
                        tipo.clone()
                    } else {
                        descricao.to_string()
                    },
                    tipo,
                    valor: Decimal::ZERO,
                }
            })
            .valor += ajuste.vl_aj_apur;
    }

    grupos.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Registro0000, RegistroC100};

    fn item(cod_item: &str, cfop: &str, qtd: Decimal, vl_item: Decimal, icms: Decimal) -> RegistroC170 {
        RegistroC170 {
            cod_item: cod_item.to_string(),
            cfop: cfop.to_string(),
            qtd,
            vl_item,
            vl_icms: icms,
            vl_bc_icms: vl_item,
            ..Default::default()
        }
    }

    fn arquivo_exemplo() -> ArquivoSped {
        ArquivoSped {
            registro_0000: Some(Registro0000 {
                cnpj: "12345678000190".into(),
                uf: "SP".into(),
                dt_ini: NaiveDate::from_ymd_opt(2024, 1, 1),
                ..Default::default()
            }),
            participantes: vec![
                Registro0150 {
                    cod_part: "F1".into(),
                    nome: "FORNECEDOR RJ".into(),
                    cnpj: "98765432000110".into(),
                    cod_mun: "3304557".into(),
                    ..Default::default()
                },
                Registro0150 {
                    cod_part: "F2".into(),
                    nome: "PRODUTOR".into(),
                    cpf: "12345678901".into(),
                    ..Default::default()
                },
            ],
            itens: vec![
                Registro0200 {
                    cod_item: "GESSO".into(),
                    descr_item: "GESSO  EM   PO".into(),
                    cod_ncm: "25222000".into(),
                    ..Default::default()
                },
                Registro0200 {
                    cod_item: "CIMENTO".into(),
                    descr_item: "CIMENTO CP II".into(),
                    cod_ncm: "25232910".into(),
                    ..Default::default()
                },
            ],
            documentos: vec![
                RegistroC100 {
                    ind_oper: IndOper::Entrada,
                    cod_part: "F1".into(),
                    vl_doc: dec!(1000),
                    vl_icms: dec!(120),
                    itens: vec![
                        item("GESSO", "2102", dec!(10), dec!(600), dec!(72)),
                        item("CIMENTO", "2102", dec!(4), dec!(400), dec!(48)),
                    ],
                    ..Default::default()
                },
                RegistroC100 {
                    ind_oper: IndOper::Entrada,
                    cod_part: "F2".into(),
                    vl_doc: dec!(200),
                    itens: vec![item("GESSO", "1102", dec!(2), dec!(200), dec!(0))],
                    ..Default::default()
                },
                RegistroC100 {
                    ind_oper: IndOper::Saida,
                    cod_part: "F1".into(),
                    vl_doc: dec!(1500),
                    vl_icms: dec!(270),
                    itens: vec![item("CIMENTO", "5102", dec!(0), dec!(1500), dec!(270))],
                    ..Default::default()
                },
            ],
            ajustes: vec![
                RegistroE111 {
                    cod_aj_apur: "SP200001".into(),
                    descr_compl_aj: "".into(),
                    vl_aj_apur: dec!(10),
                },
                RegistroE111 {
                    cod_aj_apur: "SP200001".into(),
                    descr_compl_aj: "outro".into(),
                    vl_aj_apur: dec!(5.5),
                },
                RegistroE111 {
                    cod_aj_apur: "SP000002".into(),
                    descr_compl_aj: "Estorno manual".into(),
                    vl_aj_apur: dec!(1),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn simulacao_com_reducao_de_ncm() {
        let totais = Totais {
            quantidade: dec!(3),
            valor_bruto: dec!(1000),
            icms: dec!(180),
            pis: dec!(16.50),
            cofins: dec!(76),
            ..Default::default()
        };

        let sem_reducao = Simulacao::calcular(&totais, dec!(27), Decimal::ZERO);
        assert_eq!(sem_reducao.total_tributos, dec!(272.50));
        assert_eq!(sem_reducao.valor_liquido, dec!(727.50));
        assert_eq!(sem_reducao.ibs_cbs, dec!(196.43)); // 196,425 -> 196,43
        assert_eq!(sem_reducao.total_reforma, dec!(923.93));
        assert_eq!(sem_reducao.diferenca, dec!(-76.07));
        assert_eq!(sem_reducao.carga_atual, dec!(27.25));

        let com_reducao = Simulacao::calcular(&totais, dec!(27), dec!(60));
        assert_eq!(com_reducao.aliquota_efetiva, dec!(10.8));
        assert_eq!(com_reducao.ibs_cbs, dec!(78.57));

        let unitarios = ValoresUnitarios::calcular(&totais, &sem_reducao);
        assert_eq!(unitarios.valor_bruto, dec!(333.33));
        assert_eq!(unitarios.ibs_cbs, dec!(65.48));
    }

    #[test]
    fn quantidade_zero_divide_por_um() {
        let totais = Totais {
            valor_bruto: dec!(10.005),
            ..Default::default()
        };
        let simulacao = Simulacao::calcular(&totais, dec!(27), Decimal::ZERO);
        let unitarios = ValoresUnitarios::calcular(&totais, &simulacao);
        assert_eq!(unitarios.valor_bruto, dec!(10.01));
    }

    #[test]
    fn aliquotas_efetivas() {
        let totais = Totais {
            icms: dec!(18),
            vl_bc_icms: dec!(100),
            pis: dec!(1),
            vl_bc_pis: dec!(60.6),
            ..Default::default()
        };
        let aliquotas = AliquotasEfetivas::calcular(&totais);
        assert_eq!(aliquotas.icms, dec!(18));
        assert_eq!(aliquotas.pis, dec!(1.6502));
        assert_eq!(aliquotas.cofins, Decimal::ZERO);
    }

    #[test]
    fn percentual_sem_divisao_por_zero() {
        assert_eq!(percentual(dec!(5), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(percentual(dec!(1), dec!(3)), dec!(33.3333));
    }

    #[test]
    fn produtos_agrupados_por_codigo() {
        let relatorio = Agregador::default().gerar(&[arquivo_exemplo()]);

        assert_eq!(relatorio.arquivos, 1);
        assert_eq!(relatorio.produtos_entradas.len(), 2);

        let gesso = &relatorio.produtos_entradas[0];
        assert_eq!(gesso.codigo, "GESSO");
        assert_eq!(gesso.descricao, "GESSO EM PO");
        assert_eq!(gesso.ncm, "25222000");
        assert_eq!(gesso.cfop, "2102");
        assert_eq!(gesso.totais.quantidade, dec!(12));
        assert_eq!(gesso.totais.valor_bruto, dec!(800));
        assert_eq!(gesso.simulacao.perc_reducao, dec!(60));

        let cimento = &relatorio.produtos_entradas[1];
        assert_eq!(cimento.simulacao.perc_reducao, Decimal::ZERO);

        assert_eq!(relatorio.fonte_saidas, Fonte::Sped);
        assert_eq!(relatorio.produtos_saidas.len(), 1);
    }

    #[test]
    fn conservacao_do_valor_bruto() {
        let arquivo = arquivo_exemplo();
        let relatorio = Agregador::default().gerar(std::slice::from_ref(&arquivo));

        let soma_itens: Decimal = arquivo
            .itens_de_documentos()
            .filter(|(doc, _)| doc.ind_oper == IndOper::Entrada)
            .map(|(_, item)| item.vl_item)
            .sum();
        let soma_grupos: Decimal = relatorio
            .produtos_entradas
            .iter()
            .map(|p| p.totais.valor_bruto)
            .sum();

        assert_eq!(soma_itens, soma_grupos);
        assert_eq!(relatorio.totais_entradas.totais.valor_bruto, soma_itens);
    }

    #[test]
    fn fornecedores_cfops_e_ufs() {
        let relatorio = Agregador::default().gerar(&[arquivo_exemplo()]);

        assert_eq!(relatorio.fornecedores.len(), 2);
        let f1 = &relatorio.fornecedores[0];
        assert_eq!(f1.cod_part, "F1");
        assert_eq!(f1.regime, RegimeTributario::NaoConsultado);
        assert_eq!(f1.uf, "RJ");
        assert_eq!(f1.totais.valor_bruto, dec!(1000));
        assert_eq!(relatorio.fornecedores[1].regime, RegimeTributario::PessoaFisica);

        let cfops: Vec<&str> = relatorio.cfops_entradas.iter().map(|c| c.cfop.as_str()).collect();
        assert_eq!(cfops, ["1102", "2102"]);

        let ufs: Vec<&str> = relatorio.ufs_entradas.iter().map(|u| u.uf.as_str()).collect();
        assert_eq!(ufs, ["N/I", "RJ"]);
    }

    #[test]
    fn cadastros_de_varios_arquivos() {
        let primeiro = arquivo_exemplo();
        let mut segundo = arquivo_exemplo();
        segundo.participantes[0].nome = "FORNECEDOR MG".into();
        segundo.participantes[0].cod_mun = "3106200".into();
        segundo.itens[0].descr_item = "GESSO AGRICOLA".into();

        let relatorio = Agregador::default().gerar(&[primeiro, segundo]);

        // 0150: o primeiro arquivo é mantido
        let f1 = &relatorio.fornecedores[0];
        assert_eq!(f1.cod_part, "F1");
        assert_eq!(f1.nome, "FORNECEDOR RJ");
        assert_eq!(f1.uf, "RJ");
        assert_eq!(f1.documentos, 2);

        // 0200: o último arquivo prevalece
        let gesso = relatorio
            .produtos_entradas
            .iter()
            .find(|p| p.codigo == "GESSO")
            .unwrap();
        assert_eq!(gesso.descricao, "GESSO AGRICOLA");
    }

    #[test]
    fn ajustes_agrupados() {
        let relatorio = Agregador::default().gerar(&[arquivo_exemplo()]);

        assert_eq!(relatorio.ajustes.len(), 2);
        assert_eq!(relatorio.ajustes[0].codigo, "SP000002");
        assert_eq!(relatorio.ajustes[0].descricao, "Estorno manual");
        assert_eq!(relatorio.ajustes[1].descricao, "2 – Outros créditos");
        assert_eq!(relatorio.ajustes[1].valor, dec!(15.5));
        assert_eq!(relatorio.total_ajustes, dec!(16.5));
    }

    #[test]
    fn apuracao_debitos_menos_creditos() {
        let relatorio = Agregador::default().gerar(&[arquivo_exemplo()]);
        let apuracao = &relatorio.apuracao;

        assert_eq!(apuracao.debitos_atual, dec!(270));
        assert_eq!(apuracao.creditos_atual, dec!(120));
        assert_eq!(apuracao.resultado_atual, dec!(150));
        assert_eq!(apuracao.carga_atual, dec!(10));
        assert_eq!(
            apuracao.resultado_reforma,
            relatorio.totais_saidas.ibs_cbs - relatorio.totais_entradas.ibs_cbs
        );
    }

    #[test]
    fn produtos_externos_quando_nao_ha_saidas() {
        let mut arquivo = arquivo_exemplo();
        arquivo.documentos.retain(|doc| doc.ind_oper == IndOper::Entrada);

        let externos = vec![
            ProdutoExterno {
                codigo: "A".into(),
                ncm: "25222000".into(),
                cfop: "5.102".into(),
                quantidade: dec!(1),
                valor_total: dec!(100),
                ..Default::default()
            },
            ProdutoExterno {
                codigo: "A".into(),
                ncm: "25222000".into(),
                quantidade: dec!(1),
                valor_total: dec!(50),
                ..Default::default()
            },
            ProdutoExterno {
                codigo: "A".into(),
                ncm: "99999999".into(),
                quantidade: dec!(1),
                valor_total: dec!(10),
                ..Default::default()
            },
        ];

        let agregador = Agregador::default().com_produtos_externos(externos);
        let relatorio = agregador.gerar(&[arquivo]);

        assert_eq!(relatorio.fonte_saidas, Fonte::Externa);
        assert_eq!(relatorio.produtos_saidas.len(), 2);
        let principal = &relatorio.produtos_saidas[0];
        assert_eq!(principal.totais.valor_bruto, dec!(150));
        assert_eq!(principal.cfop, "5102");
        assert_eq!(principal.descricao, "A");

        // Mesmas fórmulas dos itens do Sped.
        let esperado = Simulacao::calcular(&principal.totais, dec!(27), dec!(60));
        assert_eq!(principal.simulacao, esperado);
    }

    #[test]
    fn selecao_por_cnpj_e_periodo() {
        let arquivo = arquivo_exemplo();

        let mut selecao = Selecao {
            cnpj: Some("12345678000190".into()),
            ..Default::default()
        };
        assert!(selecao.inclui(&arquivo));

        selecao.cnpj = Some("12345678000271".into());
        assert!(!selecao.inclui(&arquivo));
        selecao.agrupar_filiais = true;
        assert!(selecao.inclui(&arquivo));

        selecao.periodo_inicial = "2024-02".parse().ok();
        assert!(!selecao.inclui(&arquivo));
        selecao.periodo_inicial = "2023-12".parse().ok();
        selecao.periodo_final = "2024-01".parse().ok();
        assert!(selecao.inclui(&arquivo));

        assert!(!selecao.inclui(&ArquivoSped::default()));
        assert!(Selecao::default().inclui(&ArquivoSped::default()));
    }

    #[test]
    fn relatorio_vazio() {
        let relatorio = Agregador::default().gerar(std::iter::empty());
        assert!(relatorio.produtos_entradas.is_empty());
        assert_eq!(relatorio.apuracao, Apuracao::default());
    }
}
